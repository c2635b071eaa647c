//! Sample ring buffer between the capture side and the analysis thread.
//! Pre-allocated with a power-of-two capacity; never grows. When the reader
//! falls behind, the oldest unread samples are overwritten and counted.

pub struct RingBuffer {
    buffer: Box<[f32]>,
    mask: usize,
    write_pos: usize,
    read_pos: usize,
    unread: usize,
    dropped: u64,
}

impl RingBuffer {
    /// Capacity is rounded up to the next power of two.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(2).next_power_of_two();
        Self {
            buffer: vec![0.0f32; capacity].into_boxed_slice(),
            mask: capacity - 1,
            write_pos: 0,
            read_pos: 0,
            unread: 0,
            dropped: 0,
        }
    }

    /// Append samples, overwriting the oldest unread data if full.
    #[inline]
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.capacity();
        let mut lost = 0u64;
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) & self.mask;
            if self.unread == capacity {
                self.read_pos = (self.read_pos + 1) & self.mask;
                lost += 1;
            } else {
                self.unread += 1;
            }
        }
        self.dropped += lost;
    }

    /// Read up to `output.len()` unread samples, oldest first.
    #[inline]
    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.unread);
        for slot in output.iter_mut().take(to_read) {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) & self.mask;
        }
        self.unread -= to_read;
        to_read
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.unread
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Samples overwritten since creation or the last `take_dropped`.
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

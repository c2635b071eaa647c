//! GMIA model: ridge-regularized reference direction plus a non-linear
//! similarity-to-score scaling constant.
//!
//! Training solves `(X Xᵀ + λI) α = 1`, `w = Xᵀ α` (or the primal form when the
//! feature dimension is smaller than the vector count) with λ = 1e9, then fixes
//! the scaling constant so the reference scores itself at the target score.
//!
//! Inference multiplies cosine similarity by `min(1, ‖x‖ / ‖w‖)` so quiet
//! signals cannot match a loud reference by direction alone. This magnitude
//! factor is an extension beyond the published GMIA formulation.

mod inference;
mod training;

pub use inference::{
    adjusted_similarity, cosine_similarity, infer, magnitude_factor, score_frame, Inference,
};
pub use training::{train_model, train_model_with_target, DEFAULT_TARGET_SCORE};

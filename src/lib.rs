//! Menu photo to dish gallery.
//!
//! `dishlens` reads a photographed menu, pulls the dish names out with a
//! vision-language service, translates them, and for each dish ranks a catalog
//! of reference dish photos by CLIP text-image similarity, alongside a short
//! ingredient summary.
//!
//! # Architecture
//!
//! - **Extraction/translation**: an OpenAI-compatible chat-completions API
//!   behind the [`services::MenuServices`] trait
//! - **Embeddings**: local ONNX Runtime with the CLIP ViT-B/32 text tower (512 dimensions)
//! - **Catalog**: precomputed, L2-normalized CLIP image embeddings loaded from JSON
//! - **Ranking**: exact cosine similarity over the whole catalog, stable top-K
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`catalog`]: Reference dish catalog, its load-time validation, and building it from photos
//! - [`embedding`]: Text-to-vector embedding via ONNX Runtime, loaded once on first use, and the matching image encoder
//! - [`vector`]: Cosine similarity and normalization
//! - [`ranking`]: Top-K similarity ranking
//! - [`services`]: External extraction, translation and ingredient calls
//! - [`stages`]: Image validation, extraction and translation decoding
//! - [`pipeline`]: The end-to-end resolution workflow
//! - [`error`]: Run-, dish- and value-level failure types

pub mod catalog;
pub mod config;
pub mod embedding;
pub mod error;
pub mod pipeline;
pub mod ranking;
pub mod services;
pub mod stages;
pub mod vector;

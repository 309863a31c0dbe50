//! Image verification engine for custodia admission control.
//!
//! `custodia-engine` evaluates image-verification rules against a pending
//! admission: it extracts image references from the resource, matches them
//! against rule patterns, verifies signatures and in-toto attestations
//! through a pluggable [`verifier::SignatureVerifier`] with M-of-N
//! threshold semantics, evaluates predicate conditions, and emits digest
//! patches. The entry point is [`driver::verify_and_patch_images`].

pub mod attestations;
pub mod attestors;
pub mod context;
pub mod driver;
pub mod error;
pub mod extract;
pub mod image;
pub mod matcher;
pub mod metadata;
pub mod mutate;
pub mod response;
pub mod variables;
pub mod verifier;

pub use context::{CancelToken, ContextLoader, EvalContext, NoContext, PolicyContext};
pub use driver::verify_and_patch_images;
pub use error::EngineError;
pub use image::ImageInfo;
pub use metadata::{ImageVerificationMetadata, VERIFY_IMAGES_ANNOTATION};
pub use response::{EngineResponse, RuleResponse, RuleStatus};
pub use verifier::{
    Descriptor, SignatureVerifier, Statement, VerifierError, VerifierOptions, VerifierResponse,
};

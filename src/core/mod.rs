pub mod fileio;
pub mod hasher;
pub mod manifest;
pub mod metadata;
pub mod operations;
pub mod pathmap;
pub mod sidecar;
pub mod verify;

pub use hasher::{HashAlgorithm, digest_file};
pub use manifest::{FileEntry, Manifest, ManifestRef, Operation, OperationKind};
pub use operations::{
    CopyOptions, MoveOptions, OperationEvent, OperationResult, Orchestrator, RestoreOptions,
};
pub use pathmap::{PathStyle, Projection, project};
pub use sidecar::{JsonSidecarWriter, LinkSidecarWriter};
pub use verify::{
    ThreeWayReport, VerificationReport, VerificationStatus, verify_against_manifest,
    verify_file, verify_three_way,
};

/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public update transport crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod client;
pub mod error;
pub mod release;
pub mod transport;
pub mod version;

pub use client::{ClientConfig, DEFAULT_API_BASE_URL, ReleaseClient, ReleaseSource};
pub use error::{Result, UpdateError};
pub use release::{AssetPayload, ReleaseInfo, ReleasePayload};
pub use transport::{ProgressSink, UpdateTransport, verify_artifact};
pub use version::Version;

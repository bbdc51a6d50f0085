//! Client-side OAuth 2.0 token acquisition for mobile applications
//!
//! This crate implements the full acquisition pipeline an application-facing
//! authentication library needs: a keyed token cache with multi-resource
//! refresh token (MRRT) semantics, silent refresh, an interactive
//! authorization fallback, an out-of-band broker exchange, and a uniform
//! result model. Every platform touchpoint is a trait, so the core is fully
//! testable without a device.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────┐
//! │ AuthenticationContext  │  Public entry surface, one per authority
//! └───────────┬────────────┘
//!             │
//!             ▼
//! ┌────────────────────────┐
//! │   AcquisitionEngine    │  State machine + request collapsing
//! └───────────┬────────────┘
//!             │
//!             ├──► TokenCache            (MRRT-aware records, PersistentStore)
//!             ├──► TokenEndpoint         (refresh / code / assertion grants)
//!             ├──► InteractiveSurface    (authorization UI, injected)
//!             └──► BrokerTransport       (system broker, injected)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use lantern_auth::{AuthenticationContext, AuthenticationRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = AuthenticationContext::builder("https://login.example.com/tenant")
//!     .extended_lifetime(true)
//!     .build()?;
//! context.initialize().await?;
//!
//! let request = AuthenticationRequest::new(
//!     "https://graph.example.com",
//!     "your_client_id",
//!     "app://auth-callback",
//! );
//! let result = context.acquire_token_silent(request).await;
//! if result.succeeded() {
//!     println!("access token: {:?}", result.access_token);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - **[`context`]**: the [`AuthenticationContext`] entry surface
//! - **[`engine`]**: acquisition state machine and request collapsing
//! - **[`cache`]**: token cache, cache keys, MRRT wildcard records
//! - **[`refresh`]**: token endpoint client for the silent grants
//! - **[`interactive`]**: authorization URL building and the UI round trip
//! - **[`broker`]**: broker wire format and pending-exchange registry
//! - **[`authority`]**: authority canonicalization and validation
//! - **[`result`]**: the uniform [`AuthenticationResult`] model
//! - **[`traits`]**: platform collaborator traits
//! - **[`testing`]**: scriptable mocks for the collaborator traits

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod authority;
pub mod broker;
pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod interactive;
pub mod refresh;
pub mod result;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export the types most callers need
pub use authority::{Authority, AuthorityResolver};
pub use broker::{BrokerContract, BrokerRequest, BrokerResponse};
pub use cache::{CacheEntry, CacheKey, TokenCache};
pub use context::{AuthenticationContext, AuthenticationContextBuilder};
pub use engine::AcquisitionEngine;
pub use error::{AuthError, AuthResult, BrokerError, ErrorKind, UiError};
pub use refresh::{SilentRefreshClient, TokenEndpoint};
pub use result::{AuthenticationResult, AuthenticationStatus};
pub use traits::{
    BrokerTransport, InteractiveSurface, MetadataProvider, PersistentStore, SurfaceOutcome,
};
pub use types::{
    AssertionType, AuthenticationRequest, PromptBehavior, RequestContext, TokenResponse,
    UserIdentifier, UserInfo,
};

pub mod aggregator;
pub mod avatar;
mod error;
pub mod fetcher;
pub mod guest_token;
pub mod harvest;
pub mod http;
pub mod markup;
pub mod mirrors;
pub mod normalize;
pub mod resolver;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod verify;

pub use aggregator::AggregatorResolver;
pub use fetcher::{FetcherSettings, ProfileFetcher};
pub use guest_token::GuestTokenManager;
pub use harvest::{CandidateSelector, VerificationCache};
pub use http::{FetchedPage, HttpPageFetcher, PageFetcher, UserAgentPool};
pub use mirrors::MirrorSelector;
pub use resolver::SocialLinkResolver;
pub use traits::{ProfileSource, XApi};
pub use verify::VerificationEngine;

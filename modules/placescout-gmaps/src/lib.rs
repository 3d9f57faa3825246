pub mod browser;
pub mod email;
pub mod listing;
pub mod parser;
pub mod place;
pub mod preflight;
pub mod search;
pub mod verify;

pub use email::EmailExtractJob;
pub use listing::GmapJob;
pub use place::PlaceJob;
pub use preflight::EmailPreflightJob;
pub use search::{MapLocation, MapSearchParams, SearchJob};
pub use verify::EmailVerifyJob;

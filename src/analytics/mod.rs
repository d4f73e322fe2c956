pub mod cache;
pub mod cvd;
pub mod manipulation;
pub mod patterns;
pub mod regime;

pub use cache::{CacheKey, PatternCache};
pub use cvd::{CvdTracker, CvdUpdate};
pub use manipulation::DefensiveFilter;
pub use patterns::PatternMatch;
pub use regime::{MarketRegime, RegimeDetector, TrendDirection, VolatilityBucket};

//! Market-data adapter boundary.
//!
//! The core only sees `MarketEvent`s; where they come from is an adapter
//! concern. Two thin implementations ship with the binary: a JSON-lines
//! replay feed and a random-walk simulator for exercising the pipeline.

mod replay;
mod sim;

pub use replay::ReplayFeed;
pub use sim::SimFeed;

use async_trait::async_trait;

use crate::domain::MarketEvent;

#[async_trait]
pub trait MarketFeed: Send {
    /// Next event in feed order; `None` ends the stream
    async fn next(&mut self) -> Option<MarketEvent>;
}

//! Async substrate: strands, deadline timer, subscribers, racers.
//!
//! Everything here layers on the tokio multi-thread runtime. Each logical
//! owner (channel, session, pool, …) holds a [`Strand`] and accesses its
//! mutable state only from handlers run on it.

pub mod deadline;
pub mod race;
pub mod strand;
pub mod subscriber;
pub mod keyed;
pub mod time;

pub use deadline::Deadline;
pub use keyed::{Desubscriber, Resubscriber};
pub use race::{RaceQuality, RaceSpeed, RaceUnity, RaceVolume};
pub use strand::Strand;
pub use subscriber::{Subscriber, Unsubscriber};

//! Racers: join N concurrent completions into one result.
//!
//! Each shape is a small state machine with its own winning rule. A racer
//! runs on one strand; the completion handler is invoked inline from the
//! deciding `finish` call, so it executes on that strand too. All four
//! capture the winning arguments when the winner is decided but invoke the
//! completion only once the whole field has finished, so losers have fully
//! reported before the winner's continuation runs.

use crate::error::{Code, Error};
use std::sync::Mutex;

type Complete<A> = Box<dyn FnOnce(A) + Send + 'static>;
type CodeHandler = Box<dyn FnOnce(Code) + Send + 'static>;

/// First of exactly `SIZE` finishes wins; the rest are dropped.
pub struct RaceSpeed<const SIZE: usize, A> {
    state: Mutex<SpeedState<A>>,
}

struct SpeedState<A> {
    runners: usize,
    winner: Option<A>,
    complete: Option<Complete<A>>,
}

impl<const SIZE: usize, A: Send + 'static> RaceSpeed<SIZE, A> {
    pub fn new() -> Self {
        const { assert!(SIZE > 1) };
        Self {
            state: Mutex::new(SpeedState { runners: 0, winner: None, complete: None }),
        }
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().complete.is_some()
    }

    /// False implies invalid usage (already running).
    pub fn start<F>(&self, complete: F) -> bool
    where
        F: FnOnce(A) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.complete.is_some() {
            return false;
        }
        state.runners = SIZE;
        state.winner = None;
        state.complete = Some(Box::new(complete));
        true
    }

    /// True implies the winning finisher; there is always exactly one.
    pub fn finish(&self, args: A) -> bool {
        let (winner, decided) = {
            let mut state = self.state.lock().unwrap();
            if state.complete.is_none() || state.runners == 0 {
                return false;
            }
            let winner = state.winner.is_none();
            if winner {
                state.winner = Some(args);
            }
            state.runners -= 1;
            let decided = if state.runners == 0 {
                Some((state.complete.take().unwrap(), state.winner.take().unwrap()))
            } else {
                None
            };
            (winner, decided)
        };
        if let Some((complete, args)) = decided {
            complete(args);
        }
        winner
    }
}

impl<const SIZE: usize, A: Send + 'static> Default for RaceSpeed<SIZE, A> {
    fn default() -> Self {
        Self::new()
    }
}

/// First successful finish wins; with no success the last finish wins.
/// Completion fires after all finishes.
pub struct RaceQuality<A> {
    size: usize,
    state: Mutex<QualityState<A>>,
}

struct QualityState<A> {
    runners: usize,
    succeeded: bool,
    args: Option<A>,
    complete: Option<Complete<A>>,
}

impl<A: Send + 'static> RaceQuality<A> {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(QualityState {
                runners: 0,
                succeeded: false,
                args: None,
                complete: None,
            }),
        }
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().complete.is_some()
    }

    pub fn start<F>(&self, complete: F) -> bool
    where
        F: FnOnce(A) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.complete.is_some() {
            return false;
        }
        state.runners = self.size;
        state.succeeded = false;
        state.args = None;
        state.complete = Some(Box::new(complete));
        true
    }

    /// True implies the winning finisher (first success).
    pub fn finish(&self, success: bool, args: A) -> bool {
        let (winner, decided) = {
            let mut state = self.state.lock().unwrap();
            if state.complete.is_none() || state.runners == 0 {
                return false;
            }
            let winner = success && !state.succeeded;
            if winner {
                state.succeeded = true;
                state.args = Some(args);
            } else if !state.succeeded {
                // Track the latest loser in case nobody succeeds.
                state.args = Some(args);
            }
            state.runners -= 1;
            let decided = if state.runners == 0 {
                Some((state.complete.take().unwrap(), state.args.take().unwrap()))
            } else {
                None
            };
            (winner, decided)
        };
        if let Some((complete, args)) = decided {
            complete(args);
        }
        winner
    }
}

/// Fires once all have finished: with the first failure's args if any
/// failed, else the last success's args.
pub struct RaceUnity<A> {
    size: usize,
    state: Mutex<UnityState<A>>,
}

struct UnityState<A> {
    runners: usize,
    failed: bool,
    args: Option<A>,
    complete: Option<Complete<A>>,
}

impl<A: Send + 'static> RaceUnity<A> {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(UnityState {
                runners: 0,
                failed: false,
                args: None,
                complete: None,
            }),
        }
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().complete.is_some()
    }

    pub fn start<F>(&self, complete: F) -> bool
    where
        F: FnOnce(A) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.complete.is_some() {
            return false;
        }
        state.runners = self.size;
        state.failed = false;
        state.args = None;
        state.complete = Some(Box::new(complete));
        true
    }

    /// True implies unity: this was the last finish and none failed.
    pub fn finish(&self, success: bool, args: A) -> bool {
        let (unity, decided) = {
            let mut state = self.state.lock().unwrap();
            if state.complete.is_none() || state.runners == 0 {
                return false;
            }
            if !success && !state.failed {
                state.failed = true;
                state.args = Some(args);
            } else if !state.failed {
                state.args = Some(args);
            }
            state.runners -= 1;
            let last = state.runners == 0;
            let decided = if last {
                Some((state.complete.take().unwrap(), state.args.take().unwrap()))
            } else {
                None
            };
            (last && !state.failed, decided)
        };
        if let Some((complete, args)) = decided {
            complete(args);
        }
        unity
    }
}

/// Counts toward a quota across finishes. The "sufficient" handler fires at
/// the first finish whose cumulative count meets `required` (with success),
/// or at the last finish (with the configured failure); the "complete"
/// handler fires at the last finish, always with success.
pub struct RaceVolume {
    size: usize,
    required: usize,
    failure: Error,
    state: Mutex<VolumeState>,
}

struct VolumeState {
    runners: usize,
    sufficient: Option<CodeHandler>,
    complete: Option<CodeHandler>,
}

impl RaceVolume {
    pub fn new(size: usize, required: usize, failure: Error) -> Self {
        Self {
            size,
            required,
            failure,
            state: Mutex::new(VolumeState { runners: 0, sufficient: None, complete: None }),
        }
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().complete.is_some()
    }

    pub fn start<S, C>(&self, sufficient: S, complete: C) -> bool
    where
        S: FnOnce(Code) + Send + 'static,
        C: FnOnce(Code) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.complete.is_some() {
            return false;
        }
        state.runners = self.size;
        state.sufficient = Some(Box::new(sufficient));
        state.complete = Some(Box::new(complete));
        true
    }

    /// True implies first sufficient count (there may be none).
    pub fn finish(&self, count: usize) -> bool {
        let (winner, sufficient, finale) = {
            let mut state = self.state.lock().unwrap();
            if state.complete.is_none() || state.runners == 0 {
                return false;
            }
            let sufficient = if state.sufficient.is_some() && count >= self.required {
                state.sufficient.take()
            } else {
                None
            };
            let winner = sufficient.is_some();
            state.runners -= 1;
            let finale = if state.runners == 0 {
                Some((state.sufficient.take(), state.complete.take().unwrap()))
            } else {
                None
            };
            (winner, sufficient, finale)
        };
        if let Some(sufficient) = sufficient {
            sufficient(Ok(()));
        }
        if let Some((starved, complete)) = finale {
            if let Some(starved) = starved {
                starved(Err(self.failure));
            }
            complete(Ok(()));
        }
        winner
    }
}

//! OS task statistics.

use nmx_proto::{Request, Response, TaskStatRsp};

use super::{Kind, Responses, Xact, round_trip};
use crate::error::Result;
use crate::session::{Session, TxOptions};

/// Reads per-task statistics (priority, stack usage, run time, ...).
#[derive(Debug, Clone, Copy, Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct TaskStat {
    /// Transmit options.
    opts: TxOptions,
}

impl TaskStat {
    /// Creates a task statistics query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit options.
    pub const fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Xact for TaskStat {
    type Output = Responses<TaskStatRsp>;

    fn kind(&self) -> Kind {
        Kind::TaskStat
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        round_trip(s, Kind::TaskStat, &Request::TaskStat, &self.opts, |rsp| {
            match rsp {
                Response::TaskStat(r) => Some(r),
                _ => None,
            }
        })
    }
}

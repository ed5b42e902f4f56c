//! Fan-out from the shared feeds to the symbol pipelines
//!
//! Routing never waits on a pipeline. When a pipeline's queue is full its
//! inputs wait in a per-symbol backlog, where a newer tick replaces an older
//! one and a gap discards the ticks queued before it. Gaps and order updates
//! are never dropped.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use super::pipeline::PipelineInput;
use crate::common::types::MarketEvent;
use crate::execution::OrderEvent;

/// How often backlogged inputs are offered again
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// The receiving pipeline has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteClosed;

fn is_tick(input: &PipelineInput) -> bool {
    matches!(input, PipelineInput::Market(MarketEvent::Tick(_)))
}

fn is_gap(input: &PipelineInput) -> bool {
    matches!(input, PipelineInput::Market(MarketEvent::Gap { .. }))
}

/// Queue of one symbol pipeline plus what did not fit into it yet
#[derive(Debug)]
pub struct Route {
    sender: mpsc::Sender<PipelineInput>,
    backlog: VecDeque<PipelineInput>,
    superseded: u64,
}

impl Route {
    pub fn new(sender: mpsc::Sender<PipelineInput>) -> Self {
        Self {
            sender,
            backlog: VecDeque::new(),
            superseded: 0,
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Ticks replaced by newer data before the pipeline could take them
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Append `input` behind anything waiting and deliver what fits
    pub fn push(&mut self, input: PipelineInput) -> Result<(), RouteClosed> {
        if is_tick(&input) {
            let after_gap = self.backlog.iter().rposition(is_gap).map_or(0, |i| i + 1);
            if let Some(pos) = (after_gap..self.backlog.len()).find(|&i| is_tick(&self.backlog[i])) {
                self.backlog.remove(pos);
                self.superseded += 1;
            }
        } else if is_gap(&input) {
            let before = self.backlog.len();
            self.backlog.retain(|queued| !is_tick(queued));
            self.superseded += (before - self.backlog.len()) as u64;
        }
        self.backlog.push_back(input);
        self.flush()
    }

    /// Move backlogged inputs into the pipeline queue, oldest first
    pub fn flush(&mut self) -> Result<(), RouteClosed> {
        while let Some(input) = self.backlog.pop_front() {
            match self.sender.try_send(input) {
                Ok(()) => {}
                Err(TrySendError::Full(input)) => {
                    self.backlog.push_front(input);
                    break;
                }
                Err(TrySendError::Closed(_)) => return Err(RouteClosed),
            }
        }
        Ok(())
    }
}

/// Routes market and order events to the pipeline of their symbol
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn new(senders: &HashMap<String, mpsc::Sender<PipelineInput>>) -> Self {
        Self {
            routes: senders
                .iter()
                .map(|(symbol, sender)| (symbol.clone(), Route::new(sender.clone())))
                .collect(),
        }
    }

    pub fn route_market(&mut self, event: MarketEvent) -> Result<(), RouteClosed> {
        let Some(symbol) = event.symbol() else {
            match &event {
                MarketEvent::ConnectionStatus { status } => info!(?status, "Market connection"),
                other => debug!(event = ?other, "Unrouted market event"),
            }
            return Ok(());
        };
        let Some(route) = self.routes.get_mut(symbol) else {
            debug!(symbol, "Event for unconfigured symbol");
            return Ok(());
        };
        route.push(PipelineInput::Market(event))
    }

    pub fn route_order(&mut self, event: OrderEvent) -> Result<(), RouteClosed> {
        match self.routes.get_mut(&event.symbol) {
            Some(route) => route.push(PipelineInput::OrderUpdate(event)),
            None => Ok(()),
        }
    }

    /// Retry every backlog
    pub fn flush(&mut self) -> Result<(), RouteClosed> {
        for (symbol, route) in self.routes.iter_mut() {
            if route.backlog_len() > 0 {
                route.flush()?;
                if route.backlog_len() > 0 {
                    debug!(
                        symbol = %symbol,
                        waiting = route.backlog_len(),
                        superseded = route.superseded(),
                        "Pipeline busy, inputs held back"
                    );
                }
            }
        }
        Ok(())
    }

    pub fn route(&self, symbol: &str) -> Option<&Route> {
        self.routes.get(symbol)
    }
}

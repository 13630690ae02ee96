//! Function-pointer finite state machine engine for the device lifecycle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StateTable                                                 │
//! │  ┌─────────────┬───────────┬──────────┬──────────────────┐  │
//! │  │ Phase       │ on_enter  │ on_exit  │ on_update        │  │
//! │  ├─────────────┼───────────┼──────────┼──────────────────┤  │
//! │  │ Init        │ -         │ -        │ fn(ctx)->Option<>│  │
//! │  │ ConnectWifi │ fn(ctx)   │ -        │ fn(ctx)->Option<>│  │
//! │  │ ConnectApi  │ -         │ -        │ fn(ctx)->Option<>│  │
//! │  │ ConnectMqtt │ -         │ -        │ fn(ctx)->Option<>│  │
//! │  │ CheckinMqtt │ -         │ -        │ fn(ctx)->Option<>│  │
//! │  │ Finalize    │ -         │ -        │ fn(ctx)->Option<>│  │
//! │  │ Completed   │ fn(ctx)   │ -        │ fn(ctx)->Option<>│  │
//! │  └─────────────┴───────────┴──────────┴──────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the **current** phase.
//! If it returns `Some(next)`, the engine runs `on_exit` for the current
//! phase, then `on_enter` for the next, and moves the current pointer.
//! Handlers receive `&mut AgentContext<P>`, which owns the identity, the
//! connection flags and every port adapter.
//!
//! The table is generic over the [`Platform`] so the same handlers drive
//! ESP-IDF adapters on hardware and mocks on the host.

pub mod context;
pub mod states;

use context::AgentContext;
use log::info;

use crate::app::ports::Platform;

// ---------------------------------------------------------------------------
// Phase identity
// ---------------------------------------------------------------------------

/// Lifecycle phases, in the order the agent walks them.
/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Init = 0,
    ConnectWifi = 1,
    ConnectApi = 2,
    ConnectMqtt = 3,
    CheckinMqtt = 4,
    Finalize = 5,
    Completed = 6,
}

impl Phase {
    /// Total number of phases, used to size the table array.
    pub const COUNT: usize = 7;
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn<P> = fn(&mut AgentContext<P>);

/// Per-tick update handler. Returns `Some(next)` to move on, `None` to stay.
pub type StateUpdateFn<P> = fn(&mut AgentContext<P>) -> Option<Phase>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single lifecycle phase.
pub struct StateDescriptor<P: Platform> {
    pub id: Phase,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn<P>>,
    pub on_exit: Option<StateActionFn<P>>,
    pub on_update: StateUpdateFn<P>,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The lifecycle engine. Only this type moves the current phase.
pub struct Fsm<P: Platform> {
    /// Fixed-size table indexed by `Phase as usize`.
    table: [StateDescriptor<P>; Phase::COUNT],
    current: usize,
    tick_count: u64,
    state_entry_tick: u64,
}

impl<P: Platform> Fsm<P> {
    pub fn new(table: [StateDescriptor<P>; Phase::COUNT], initial: Phase) -> Self {
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Run the initial `on_enter` for the starting phase.
    /// Call once after construction, before the first `tick()`.
    pub fn start(&mut self, ctx: &mut AgentContext<P>) {
        info!("FSM starting in phase: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance by one tick and return the phase the tick ended in.
    pub fn tick(&mut self, ctx: &mut AgentContext<P>) -> Phase {
        self.tick_count = self.tick_count.wrapping_add(1);

        if let Some(next) = (self.table[self.current].on_update)(ctx) {
            self.transition(next, ctx);
        }
        self.current_phase()
    }

    pub fn current_phase(&self) -> Phase {
        self.table[self.current].id
    }

    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count - self.state_entry_tick
    }

    fn transition(&mut self, next: Phase, ctx: &mut AgentContext<P>) {
        let next_idx = next as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.state_entry_tick = self.tick_count;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}

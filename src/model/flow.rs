use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::call::Call;
use super::cell::{Cell, CellId};
use super::user::User;
use crate::gateway::GatewayClient;

/// A free-form edge label; cell handlers interpret ports themselves (a
/// Switch cell has one port per case, most others have a single
/// `"default"` port).
pub type LinkPort = String;

/// Directed edge between two cells.
#[derive(Debug, Clone)]
pub struct Link {
    pub source: CellId,
    pub source_port: LinkPort,
    pub target: CellId,
    pub target_port: LinkPort,
}

/// Cancellation flag for one concurrent execution path through a flow.
///
/// `Arc<AtomicBool>` rather than a plain bool: several `tokio::select!`
/// branches inside one handler may observe cancellation concurrently,
/// unlike a single goroutine checking its own flag.
#[derive(Debug, Clone)]
pub struct Runner {
    cancelled: Arc<AtomicBool>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance of execution for a single inbound call (spec §3 Flow).
pub struct Flow {
    pub id: String,
    pub user: User,
    pub root_cell: CellId,
    pub cells: HashMap<CellId, Cell>,
    pub links: Vec<Link>,
    pub runners: Vec<Runner>,
    pub root_call: Option<Call>,
    pub gateway: Arc<dyn GatewayClient>,
    pub macros: HashMap<String, Macro>,
}

/// A named macro: a nested flow sharing the caller's channel (spec §4.E
/// MacroModel). Kept distinct from `Flow` because a macro has no `Runner`
/// set or root call of its own until invoked.
pub struct Macro {
    pub name: String,
    pub root_cell: CellId,
    pub cells: HashMap<CellId, Cell>,
    pub links: Vec<Link>,
}

impl Flow {
    pub fn new(
        id: impl Into<String>,
        user: User,
        root_cell: CellId,
        cells: HashMap<CellId, Cell>,
        links: Vec<Link>,
        gateway: Arc<dyn GatewayClient>,
    ) -> Self {
        Self {
            id: id.into(),
            user,
            root_cell,
            cells,
            links,
            runners: Vec::new(),
            root_call: None,
            gateway,
            macros: HashMap::new(),
        }
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub fn cell_by_name(&self, name: &str) -> Option<&Cell> {
        self.cells.values().find(|c| c.name == name)
    }

    /// Links whose `source` is `id`, in declaration order.
    pub fn outbound_links(&self, id: CellId) -> Vec<&Link> {
        self.links.iter().filter(|l| l.source == id).collect()
    }

    pub fn find_link(&self, id: CellId, port: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.source == id && l.source_port == port)
    }

    pub fn spawn_runner(&mut self) -> Runner {
        let runner = Runner::new();
        self.runners.push(runner.clone());
        runner
    }

    pub fn cancel_all(&self) {
        for r in &self.runners {
            r.cancel();
        }
    }
}

//! Process-wide dependency container.
//!
//! Built once in `main` and threaded into every service, request handler and
//! job; nothing in the crate reaches for global state.

use std::sync::Arc;

use crate::checker::CheckerPool;
use crate::coordinator::ActionCoordinator;
use crate::database::Db;
use crate::notifier::Notifier;
use crate::store::{JobQueue, Store};
use crate::structs::config::Settings;

pub struct Context {
    pub settings: Settings,
    pub db: Db,
    pub store: Store,
    pub jobs: JobQueue,
    pub notifier: Notifier,
    pub coordinator: ActionCoordinator,
    pub checkers: CheckerPool,
}

pub type Ctx = Arc<Context>;

impl Context {
    pub fn new(settings: Settings, db: Db) -> Ctx {
        let store = Store::new();
        let notifier = Notifier::new(store.clone());
        let coordinator = ActionCoordinator::new(store.clone());
        let checkers = CheckerPool::new(settings.runner.checkers);

        Arc::new(Self {
            settings,
            db,
            store,
            jobs: JobQueue::new(),
            notifier,
            coordinator,
            checkers,
        })
    }

    /// Context over an in-memory database, for tests.
    pub fn for_tests() -> Ctx {
        let db = Db::open_in_memory().expect("in-memory database");
        Self::new(Settings::default(), db)
    }
}

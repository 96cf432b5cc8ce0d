use std::sync::Arc;

use libsql::Connection;

use crate::{config::AppConfig, runtime::Scheduler};

mod error;
pub mod funnel;
pub mod lead;
pub mod messenger;

pub use error::ServiceError;
pub use funnel::FunnelService;
pub use lead::{LeadStore, LibSqlLeadStore};
pub use messenger::{Messenger, TelegramMessenger};

#[derive(Clone)]
pub struct ServiceRegistry {
    pub funnel: Arc<FunnelService>,
}

impl ServiceRegistry {
    pub fn new(
        config: &AppConfig,
        conn: Connection,
        scheduler: Arc<dyn Scheduler>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        info!("Initializing service registry");

        let leads: Arc<dyn LeadStore> = Arc::new(LibSqlLeadStore::new(conn));
        let funnel = Arc::new(FunnelService::new(
            leads,
            scheduler,
            messenger,
            config.funnel.clone(),
        ));

        info!("Service registry initialized");

        Self { funnel }
    }
}

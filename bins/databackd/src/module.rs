use std::sync::Arc;

use databack_core::store::SharedStore;
use tokio::task::JoinHandle;

use crate::gate::Gate;

#[derive(Clone)]
pub struct ModuleCtx {
    pub store: SharedStore,
    pub gate: Arc<Gate>,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

pub trait Module: Send + 'static {
    fn name(&self) -> &'static str;
    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>>;
}

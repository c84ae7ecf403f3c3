use crate::{proxy::Proxy, query::QueryEngine};

#[derive(Clone)]
pub struct AppState {
    pub query: QueryEngine,
    pub proxy: Proxy,
}

impl AppState {
    pub fn new(query: QueryEngine, proxy: Proxy) -> Self {
        Self { query, proxy }
    }
}

use crate::{
    adapter::adapt,
    backend::QueryBackend,
    error::{Result, ServiceError},
    models::LegacyResponse,
    parser,
    translate::translate,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The only `epoch` precision the legacy endpoint answers in.
pub const SUPPORTED_EPOCH: &str = "s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParameters {
    pub database: String,
    pub epoch: String,
    pub query_text: String,
}

impl RequestParameters {
    /// Validates decoded form pairs. The first occurrence of a field wins.
    pub fn from_form(form: &[(String, String)]) -> Result<Self> {
        let database = field(form, "db").ok_or(ServiceError::MissingField("db"))?;
        let epoch = field(form, "epoch").ok_or(ServiceError::MissingField("epoch"))?;
        if epoch != SUPPORTED_EPOCH {
            return Err(ServiceError::InvalidEpoch(epoch.to_string()));
        }
        let query_text = field(form, "q").ok_or(ServiceError::MissingField("q"))?;

        Ok(Self {
            database: database.to_string(),
            epoch: epoch.to_string(),
            query_text: query_text.to_string(),
        })
    }
}

fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[derive(Clone)]
pub struct QueryEngine {
    backend: Arc<dyn QueryBackend>,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    pub async fn execute(&self, params: &RequestParameters) -> Result<LegacyResponse> {
        let query = parser::parse(&params.query_text).map_err(|err| {
            debug!(
                db = %params.database,
                query = %params.query_text,
                error = %err,
                "rejected legacy query"
            );
            err
        })?;

        info!(
            metric = %query.metric,
            column = %query.column,
            db = %params.database,
            where_key = %query.where_key,
            where_value = %query.where_value,
            "query"
        );

        let expr = translate(&query, &params.database).map_err(|err| {
            debug!(
                db = %params.database,
                query = %params.query_text,
                error = %err,
                "rejected legacy query"
            );
            err
        })?;
        debug!(%expr, "translated legacy query");

        let outcome = self.backend.query(&expr, None).await.map_err(|err| {
            warn!(
                %expr,
                db = %params.database,
                where_key = %query.where_key,
                where_value = %query.where_value,
                error = %err,
                "upstream query failed"
            );
            err
        })?;

        for warning in &outcome.warnings {
            warn!(%expr, %warning, "upstream returned a warning");
        }

        let kind = outcome.value.type_name();
        adapt(outcome.value, &query.metric).map_err(|err| {
            warn!(
                %expr,
                result_type = kind,
                db = %params.database,
                where_key = %query.where_key,
                where_value = %query.where_value,
                error = %err,
                "upstream result cannot be represented"
            );
            err
        })
    }
}

use server_api::ApiContext;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) http: HttpSettings,
}

/// Transport limits applied to the router as layers.
#[derive(Debug, Clone)]
pub(crate) struct HttpSettings {
    pub(crate) cors_allow_origin: String,
    pub(crate) max_body_bytes: usize,
}

use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the race timing backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::debug::get_state,
        crate::routes::debug::get_clients,
        crate::routes::debug::save,
        crate::routes::debug::get_data_file,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::debug::ClientsResponse,
            crate::dto::debug::SaveResponse,
            crate::dto::debug::DataFileResponse,
            crate::dto::ws::ClientCommand,
            crate::state::race::RaceState,
            crate::state::race::Race,
            crate::state::race::Rider,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "debug", description = "Status and maintenance endpoints"),
        (name = "race", description = "WebSocket channel carrying commands and state snapshots"),
    )
)]
pub struct ApiDoc;

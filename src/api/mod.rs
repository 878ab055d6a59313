mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::Database;
use crate::molecule::MoleculeEngine;

pub use handlers::{AttachInput, CloseInput, InstantiateInput, SquashInput};

pub type AppState = Arc<MoleculeEngine<Database>>;

pub fn create_router(engine: AppState) -> Router {
    let api = Router::new()
        // Formulas and protomolecules
        .route("/formulas", get(handlers::list_formulas))
        .route("/formulas/{name}/cook", post(handlers::cook_formula))
        .route("/protomolecules", get(handlers::list_protomolecules))
        .route("/protomolecules/{id}", get(handlers::get_protomolecule))
        // Instances
        .route("/molecules", post(handlers::pour_molecule))
        .route("/wisps", post(handlers::create_wisp))
        .route("/wisps/{id}", delete(handlers::burn_wisp))
        .route("/instances", get(handlers::list_instances))
        .route("/instances/{id}", get(handlers::get_progress))
        .route("/instances/{id}/squash", post(handlers::squash_instance))
        .route("/instances/{id}/digests", get(handlers::list_instance_digests))
        // Steps
        .route("/steps/{id}/start", post(handlers::start_step))
        .route("/steps/{id}/close", post(handlers::close_step))
        // Digests
        .route("/digests/{id}", get(handlers::get_digest))
        // Agent contexts
        .route("/agents/{agent}/current", get(handlers::agent_current))
        .route("/agents/{agent}/attachment", get(handlers::get_attachment))
        .route("/agents/{agent}/attachment", put(handlers::attach))
        .route("/agents/{agent}/attachment", delete(handlers::detach))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(engine)
}

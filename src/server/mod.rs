pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::billing_log::BillingLogStore;
use crate::chain::verifier::TransactionVerifier;
use crate::keeper::Keeper;
use crate::plans::PlanStore;
use crate::subscriptions::SubscriptionStore;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<dyn SubscriptionStore + Send + Sync>,
    pub billing_log: Arc<dyn BillingLogStore + Send + Sync>,
    pub plans: Arc<dyn PlanStore + Send + Sync>,
    pub verifier: Arc<TransactionVerifier>,
    pub keeper: Arc<Keeper>,
}

pub fn create_app(state: AppState) -> Router {
    let app = handlers::routes().with_state(Arc::new(state));

    // The dashboard and checkout front-end run on their own origin.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);

    app.layer(cors).layer(TraceLayer::new_for_http())
}

use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tracing::{info, warn};

use appointment_cell::services::{
    BookingCoordinator, BookingStore, InMemoryBookingStore, InMemoryProviderDirectory, ProviderDirectory,
    SupabaseBookingStore, SupabaseProviderDirectory,
};
use appointment_cell::{appointment_routes, AppointmentState};
use payment_gateway_cell::VnPayGateway;
use reconciliation_cell::{reconciliation_routes, ReconciliationState, Reconciler};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::notification::{LogNotifier, Notifier, WebhookNotifier};
use wallet_cell::services::{InMemoryLedgerStore, Ledger, LedgerStore, SupabaseLedgerStore};
use wallet_cell::{wallet_routes, WalletState};

struct Stores {
    bookings: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderDirectory>,
    ledger: Arc<dyn LedgerStore>,
}

fn stores(config: &AppConfig) -> Stores {
    if config.is_configured() {
        info!("Using Supabase at {}", config.supabase_url);
        let client = Arc::new(SupabaseClient::new(config));
        Stores {
            bookings: Arc::new(SupabaseBookingStore::new(client.clone())),
            providers: Arc::new(SupabaseProviderDirectory::new(client.clone())),
            ledger: Arc::new(SupabaseLedgerStore::new(client)),
        }
    } else {
        warn!("Supabase is not configured, falling back to in-memory stores (data is lost on restart)");
        Stores {
            bookings: Arc::new(InMemoryBookingStore::new()),
            providers: Arc::new(InMemoryProviderDirectory::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
        }
    }
}

fn notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    match &config.notification_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    }
}

pub fn create_router(state: Arc<AppConfig>) -> Router {
    let stores = stores(&state);
    let notifier = notifier(&state);

    let gateway = Arc::new(VnPayGateway::new(&state));
    let ledger = Arc::new(Ledger::new(stores.ledger, &state).with_notifier(notifier.clone()));
    let coordinator = Arc::new(
        BookingCoordinator::new(stores.bookings, stores.providers, ledger.clone(), gateway.clone(), &state)
            .with_notifier(notifier),
    );
    let reconciler = Arc::new(Reconciler::new(gateway.clone(), ledger.clone(), coordinator.clone()));

    Router::new()
        .route("/", get(|| async { "Amae booking API is running!" }))
        .nest("/appointments", appointment_routes(AppointmentState { config: state.clone(), coordinator }))
        .nest("/wallet", wallet_routes(WalletState { config: state.clone(), ledger, gateway }))
        .nest("/payments", reconciliation_routes(ReconciliationState { config: state, reconciler }))
}

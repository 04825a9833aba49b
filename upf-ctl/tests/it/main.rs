use upf_ctl::{ClientOptions, ControlClient};
use upf_sim::{Engine, SimServer};

mod client;
mod session;
mod stats;

/// Serves a fresh engine and connects a client to it.
async fn setup(options: ClientOptions) -> (SimServer, ControlClient) {
    let _ = tracing_subscriber::fmt::try_init();

    let server = SimServer::spawn(Engine::new()).await.unwrap();
    let client = ControlClient::connect_to(server.local_addr(), options).await.unwrap();

    (server, client)
}

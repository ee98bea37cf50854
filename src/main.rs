use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use log::{info, warn};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use warp::Filter;

use room_mesh::server::{ws_route, Server};

const PORT: u16 = 4000;
const CERT_PATH: &str = "ssl/certificate.pem";
const KEY_PATH: &str = "ssl/private.key";

fn load_tls_config() -> Option<ServerConfig> {
    let cert_file = match File::open(CERT_PATH) {
        Ok(file) => file,
        Err(e) => {
            warn!("failed to open certificate file: {e}");
            return None;
        }
    };
    let key_file = match File::open(KEY_PATH) {
        Ok(file) => file,
        Err(e) => {
            warn!("failed to open private key file: {e}");
            return None;
        }
    };

    let cert_reader = &mut BufReader::new(cert_file);
    let key_reader = &mut BufReader::new(key_file);

    let certs: Vec<CertificateDer<'static>> = match certs(cert_reader).collect() {
        Ok(certs) => certs,
        Err(e) => {
            warn!("failed to parse certificate: {e}");
            return None;
        }
    };

    let keys: Vec<_> = match pkcs8_private_keys(key_reader).collect::<Result<_, _>>() {
        Ok(keys) => keys,
        Err(e) => {
            warn!("failed to parse private key: {e}");
            return None;
        }
    };
    let Some(key) = keys.into_iter().next() else {
        warn!("no private key found in {KEY_PATH}");
        return None;
    };

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKeyDer::Pkcs8(key));

    match config {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("failed to create TLS config: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let server = Arc::new(Server::new());
    let routes = ws_route(server).with(warp::cors().allow_any_origin());

    match load_tls_config() {
        Some(_) => {
            info!("starting secure signaling server (wss) on port {PORT}");
            warp::serve(routes)
                .tls()
                .cert_path(CERT_PATH)
                .key_path(KEY_PATH)
                .run(([0, 0, 0, 0], PORT))
                .await;
        }
        None => {
            info!("TLS unavailable, serving plaintext ws on port {PORT}");
            warp::serve(routes).run(([0, 0, 0, 0], PORT)).await;
        }
    }
}

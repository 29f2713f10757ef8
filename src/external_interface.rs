//! External Interface Module
//!
//! Unix socket IPC for applications using the CA service. Each connection carries
//! one framed request and receives one framed response (see [`crate::protocol`]).
//! Connections are served on their own thread so RSA work never stalls the accept loop.

use crate::protocol::{
    deserialize_request, deserialize_response, read_frame, serialize_request,
    serialize_response, write_frame, Request, Response,
};
use crate::service::CaService;
use anyhow::{Context, Result};
use std::fs;
use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Bind the listening socket, replacing a stale socket file
pub fn bind_socket(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        fs::remove_file(socket_path).context(format!(
            "Failed to remove existing socket at {}",
            socket_path.display()
        ))?;
    }
    let listener = UnixListener::bind(socket_path).context(format!(
        "Failed to bind Unix socket at {}",
        socket_path.display()
    ))?;
    info!(path = %socket_path.display(), "Unix socket server started");
    Ok(listener)
}

/// Bind `socket_path` and serve requests until the listener fails
pub fn start_socket_server(socket_path: &Path, service: Arc<CaService>) -> Result<()> {
    let listener = bind_socket(socket_path)?;
    serve(listener, service)
}

/// Accept loop; one thread per client connection
pub fn serve(listener: UnixListener, service: Arc<CaService>) -> Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let service = Arc::clone(&service);
                let spawned = thread::Builder::new()
                    .name("ca-client".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_client(stream, &service) {
                            warn!(error = %format!("{:#}", e), "Error handling client request");
                        }
                    });
                if let Err(e) = spawned {
                    error!(error = %e, "Failed to spawn client thread");
                }
            }
            Err(e) => {
                error!(error = %e, "Error accepting connection");
            }
        }
    }

    Ok(())
}

/// Handle an individual client connection
fn handle_client(mut stream: UnixStream, service: &CaService) -> Result<()> {
    let body = {
        let mut reader = BufReader::new(stream.try_clone()?);
        read_frame(&mut reader)?
    };

    let response = match deserialize_request(&body) {
        Ok(request) => {
            debug!(request = request_name(&request), "Received request");
            dispatch(service, request)
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Rejected malformed request");
            Response::Error {
                message: "Malformed request".to_string(),
            }
        }
    };

    let (_, bytes) = serialize_response(&response)?;
    write_frame(&mut stream, &bytes)
}

fn request_name(request: &Request) -> &'static str {
    match request {
        Request::GetCACertificate => "GetCACertificate",
        Request::IssueCertificate { .. } => "IssueCertificate",
        Request::VerifyCertificate { .. } => "VerifyCertificate",
        Request::RevokeCertificate { .. } => "RevokeCertificate",
        Request::ListRevocations => "ListRevocations",
        Request::SocketTest => "SocketTest",
    }
}

/// Process a request and generate its response
pub fn dispatch(service: &CaService, request: Request) -> Response {
    match request {
        Request::GetCACertificate => match service.ca_certificate() {
            Ok(certificate) => Response::GetCACertificateResponse {
                message: "CA certificate retrieved".to_string(),
                certificate,
            },
            Err(e) => error_response("Failed to get CA certificate", e),
        },
        Request::IssueCertificate {
            public_key_pem,
            email,
            name,
        } => match service.issue_certificate(&public_key_pem, &email, &name) {
            Ok(issued) => Response::IssueCertificateResponse {
                message: "Certificate issued successfully".to_string(),
                certificate: issued.certificate_pem,
                serial_number: issued.serial_number,
                expires_at: issued.expires_at,
            },
            Err(e) => error_response("Failed to issue certificate", e),
        },
        Request::VerifyCertificate { certificate } => {
            let status = service.check_certificate(&certificate);
            Response::VerifyCertificateResponse {
                message: status.message,
                is_valid: status.is_valid,
                is_revoked: status.is_revoked,
                revoked_at: status.revoked_at,
                reason: status.reason,
            }
        }
        Request::RevokeCertificate {
            serial_number,
            reason,
        } => match service.revoke_certificate(&serial_number, reason.as_deref()) {
            Ok(true) => Response::RevokeCertificateResponse {
                message: "Certificate revoked successfully".to_string(),
                serial_number,
                revoked: true,
            },
            Ok(false) => Response::RevokeCertificateResponse {
                message: "Certificate was already revoked".to_string(),
                serial_number,
                revoked: false,
            },
            Err(e) => error_response("Failed to revoke certificate", e),
        },
        Request::ListRevocations => match service.list_revocations() {
            Ok(revocations) => Response::ListRevocationsResponse {
                message: "Revocation list retrieved".to_string(),
                count: revocations.len(),
                revocations,
            },
            Err(e) => error_response("Failed to get certificate revocation list", e),
        },
        Request::SocketTest => Response::SocketTestResponse {
            message: "Socket test successful".to_string(),
        },
    }
}

fn error_response(context: &str, e: crate::error::CaError) -> Response {
    warn!(error = %e, "{}", context);
    Response::Error {
        message: format!("{}: {}", context, e),
    }
}

/// Send one request to a running server and wait for its response
pub fn send_request(socket_path: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket_path).context(format!(
        "Failed to connect to {}",
        socket_path.display()
    ))?;
    let (_, bytes) = serialize_request(request)?;
    write_frame(&mut stream, &bytes)?;
    let body = read_frame(&mut stream)?;
    deserialize_response(&body)
}

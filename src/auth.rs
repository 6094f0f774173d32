use anyhow::{Context, Result};
use google_sheets4::{hyper, hyper_rustls, oauth2, Sheets};
use std::path::Path;
use tracing::info;

use crate::sheets::SheetsHub;

/// Build a Sheets hub authenticated with a service-account key file.
pub async fn create_sheets_hub(credentials_path: &Path) -> Result<SheetsHub> {
    info!(
        "Initializing Google Sheets authentication from: {}",
        credentials_path.display()
    );

    let key = oauth2::read_service_account_key(credentials_path)
        .await
        .with_context(|| {
            format!(
                "failed to read service account key: {}",
                credentials_path.display()
            )
        })?;
    let client_email = key.client_email.clone();

    let authenticator = oauth2::ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .context("failed to build service account authenticator")?;

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .context("failed to load native root certificates")?
        .https_or_http()
        .enable_http1()
        .build();
    let client = hyper::Client::builder().build::<_, hyper::Body>(https);

    info!("Google Sheets client ready for {}", client_email);
    Ok(Sheets::new(client, authenticator))
}

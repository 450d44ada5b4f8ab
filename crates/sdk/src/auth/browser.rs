//! Opening the authorization URL for the user.

use crate::error::{ClientError, ClientResult};
use std::process::{Command, Stdio};
use tracing::{info, warn};
use url::Url;

/// Something that can present an authorization URL to the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> ClientResult<()>;
}

/// Opens URLs with the platform's default browser.
///
/// When no browser can be started the URL is printed instead, so the user can
/// open it by hand; the authorization wait carries on either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> ClientResult<()> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "refusing to open {} URL in a browser",
                url.scheme()
            )));
        }

        match opener(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => info!(url = %url, "Opened browser for authorization"),
            Err(e) => {
                warn!(error = %e, "Could not launch a browser");
                println!("Open this URL in your browser:\n\n{}\n", url);
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn opener(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn opener(url: &str) -> Command {
    // cmd treats & as a command separator
    let mut command = Command::new("cmd");
    command.args(["/C", "start", ""]).arg(url.replace('&', "^&"));
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_non_http_urls() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(matches!(
            SystemBrowser.open(&url),
            Err(ClientError::Config(_))
        ));

        let url = Url::parse("javascript:alert(1)").unwrap();
        assert!(SystemBrowser.open(&url).is_err());
    }
}

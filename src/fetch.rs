use anyhow::{anyhow, bail, Context};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Download a message so it can be analyzed like a local file. Returns the
/// path the message was saved to inside `dir`.
pub async fn fetch_eml(location: &str, dir: &Path) -> anyhow::Result<PathBuf> {
    let url = Url::parse(location).with_context(|| format!("Invalid URL: {}", location))?;

    let (name, content) = match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow!("Not a local file URL: {}", url))?;
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (file_name_of(&url), content)
        }
        "http" | "https" => {
            let client = Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
                .user_agent(concat!("hoptrace/", env!("CARGO_PKG_VERSION")))
                .build()?;
            let response = client
                .get(url.clone())
                .send()
                .await
                .with_context(|| format!("Failed to fetch {}", url))?
                .error_for_status()?;
            let content = response.bytes().await?.to_vec();
            (file_name_of(&url), content)
        }
        other => bail!("Unsupported URL scheme '{}'", other),
    };

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let target = dir.join(name);
    tokio::fs::write(&target, content)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;

    log::info!("Fetched {} to {}", url, target.display());
    Ok(target)
}

/// Last path segment of the URL, with an `.eml` extension.
fn file_name_of(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("fetched");
    let stem = Path::new(segment)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fetched".to_string());
    format!("{}.eml", stem)
}

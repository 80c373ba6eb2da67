//! `sandbox-image download` command.

use clap::Args;
use sandbox_image_store::{FetchRequest, RegistryAuth, TemplateStore, DEFAULT_SOURCE};

use crate::output;

#[derive(Args)]
pub struct DownloadArgs {
    /// Name to bind the template to
    pub name: String,

    /// Source backend (docker, oci-layout)
    #[arg(short, long, default_value = DEFAULT_SOURCE)]
    pub source: String,

    /// Reference understood by the source, defaults to the name
    #[arg(long)]
    pub reference: Option<String>,

    /// Registry overriding the one in the reference
    #[arg(short, long)]
    pub registry: Option<String>,

    /// Registry user name (falls back to REGISTRY_USERNAME)
    #[arg(short, long, requires = "password")]
    pub username: Option<String>,

    /// Registry password (falls back to REGISTRY_PASSWORD)
    #[arg(short, long, requires = "username")]
    pub password: Option<String>,
}

impl DownloadArgs {
    fn request(&self) -> FetchRequest {
        let reference = self.reference.as_deref().unwrap_or(&self.name);
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => RegistryAuth::basic(user, pass),
            _ => RegistryAuth::from_env(),
        };

        let mut request = FetchRequest::new(reference).with_auth(auth);
        if let Some(registry) = &self.registry {
            request = request.with_registry(registry);
        }
        request
    }
}

pub async fn execute(
    args: DownloadArgs,
    store: &TemplateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = args.request();
    println!("Downloading {} from {}...", request.reference, args.source);

    let report = store.download(&args.name, &args.source, &request).await?;

    let mut stored_bytes = 0;
    for id in &report.stored {
        stored_bytes += store.layers().size_of(id)?;
    }

    println!(
        "Downloaded {} ({}): {} layers stored ({}), {} reused",
        args.name,
        report.top.short(),
        report.stored.len(),
        output::format_bytes(stored_bytes),
        report.reused.len()
    );
    Ok(())
}

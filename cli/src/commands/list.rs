//! `sandbox-image list` command.

use clap::Args;
use sandbox_image_store::TemplateStore;

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Only display template names
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ListArgs,
    store: &TemplateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let templates = store.list_templates()?;

    if args.quiet {
        for template in &templates {
            println!("{}", template.name);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["NAME", "ID", "LAYERS", "SIZE", "SOURCE", "CREATED"]);
    for template in &templates {
        table.add_row(vec![
            template.name.clone(),
            template.top.short().to_string(),
            template.depth.to_string(),
            output::format_bytes(template.size_bytes),
            template.source.clone(),
            output::format_ago(&template.created_at),
        ]);
    }

    println!("{table}");
    Ok(())
}

use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, clap::ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Render `data` in the requested format
pub fn render_output<T: Serialize>(data: T, format: OutputFormat) -> Result<String> {
    let json_value = serde_json::to_value(data)?;

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&json_value)?,
        OutputFormat::Yaml => serde_yaml::to_string(&json_value)?
            .trim_end()
            .to_string(),
    };

    Ok(rendered)
}

pub fn print_output<T: Serialize>(data: T, format: OutputFormat) -> Result<()> {
    println!("{}", render_output(data, format)?);
    Ok(())
}

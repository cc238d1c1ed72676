use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Configuration for the docx-template command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "docx-template", version)]
#[command(about = "Fill placeholders in .docx templates, even when Word split them across runs")]
pub struct Config {
    /// Log every placeholder decision (debug level) unless RUST_LOG is set
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render `{{expr}}` placeholders against a JSON context
    Render {
        /// Template .docx file
        template: PathBuf,

        /// JSON file holding the template context
        #[arg(long, env = "DOCX_TEMPLATE_DATA")]
        data: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Replace `{key}` placeholders from a flat JSON object
    Replace {
        /// Template .docx file
        template: PathBuf,

        /// JSON file holding an object of key to replacement text
        #[arg(long, env = "DOCX_TEMPLATE_MAP")]
        map: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the placeholders found in a template as JSON
    Inspect {
        /// Template .docx file
        template: PathBuf,

        /// Also report `{key}` placeholders this map does not cover
        #[arg(long)]
        map: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output file (defaults to <template>_output.docx next to the template)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Replace an image part, e.g. --media image1.png=logo.png
    #[arg(long = "media", value_name = "NAME=PATH", value_parser = parse_media)]
    pub media: Vec<MediaReplacement>,
}

/// An existing media part to overwrite with the contents of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReplacement {
    /// Full part name inside the archive
    pub part: String,
    pub path: PathBuf,
}

/// Bare file names are taken to live under `word/media/`.
fn parse_media(value: &str) -> Result<MediaReplacement, String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{}'", value))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{}'", value));
    }

    let part = if name.starts_with("word/") {
        name.to_string()
    } else {
        format!("word/media/{}", name)
    };
    Ok(MediaReplacement {
        part,
        path: PathBuf::from(path),
    })
}

//! Command line interface of the `ipr` command

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, builder::PossibleValuesParser};
use serde_json::Value;
use tracing::info;

use crate::{
    config::Settings,
    connection::UploadOptions,
    inputs::load_variant_table,
    logging::{LOG_LEVELS, LoggingConfig, init_logging},
    pipeline::{CreateReportOptions, ReportOptions, create_report},
};

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("{:?} is not a valid filename. does not exist", value))
    }
}

fn log_level_names() -> PossibleValuesParser {
    PossibleValuesParser::new(LOG_LEVELS.iter().map(|(name, _)| *name))
}

/// Annotate variant calls with GraphKB and upload the report to IPR
#[derive(Debug, Parser)]
#[command(name = "ipr", version, about)]
pub struct Cli {
    /// Username for IPR, and for GraphKB unless --graphkb_username is given [env: IPR_USER, USER]
    #[arg(long, env = "IPR_USER")]
    pub username: Option<String>,

    /// Password for IPR, and for GraphKB unless --graphkb_password is given
    #[arg(long, env = "IPR_PASS", hide_env_values = true)]
    pub password: String,

    #[arg(long = "graphkb_username", env = "GRAPHKB_USER")]
    pub graphkb_username: Option<String>,

    #[arg(long = "graphkb_password", env = "GRAPHKB_PASS", hide_env_values = true)]
    pub graphkb_password: Option<String>,

    /// Report content as JSON
    #[arg(short = 'c', long, value_parser = existing_file)]
    pub content: PathBuf,

    /// Small mutations as a tab delimited file
    #[arg(long = "small_mutations", value_parser = existing_file)]
    pub small_mutations: Option<PathBuf>,

    /// Copy variants as a tab delimited file
    #[arg(long = "copy_variants", value_parser = existing_file)]
    pub copy_variants: Option<PathBuf>,

    /// Structural variants as a tab delimited file
    #[arg(long = "structural_variants", value_parser = existing_file)]
    pub structural_variants: Option<PathBuf>,

    /// Expression variants as a tab delimited file
    #[arg(long = "expression_variants", value_parser = existing_file)]
    pub expression_variants: Option<PathBuf>,

    #[arg(long = "ipr_url", env = "IPR_URL")]
    pub ipr_url: Option<String>,

    #[arg(long = "graphkb_url", env = "GRAPHKB_URL")]
    pub graphkb_url: Option<String>,

    #[arg(long = "log_level", default_value = "info", value_parser = log_level_names())]
    pub log_level: String,

    /// Also write log lines to this file
    #[arg(long = "log_file")]
    pub log_file: Option<PathBuf>,

    /// Path to a JSON file to write the report upload body to
    #[arg(short = 'o', long = "output_json_path")]
    pub output_json_path: Option<PathBuf>,

    /// Write to output_json_path after successful uploads too
    #[arg(short = 'w', long = "always_write_output_json")]
    pub always_write_output_json: bool,

    /// Generate therapeutic options
    #[arg(long)]
    pub therapeutics: bool,

    /// Turn off generating the analyst comments section of the report
    #[arg(long = "skip_comments")]
    pub skip_comments: bool,

    /// Build the report without uploading it to IPR
    #[arg(long = "no_upload")]
    pub no_upload: bool,

    /// Upload through the async report endpoint
    #[arg(long = "async_upload")]
    pub async_upload: bool,

    /// Minutes to wait for an async upload to finish
    #[arg(long = "mins_to_wait", default_value_t = 5)]
    pub mins_to_wait: u64,

    /// Ask IPR to ignore report fields it does not support
    #[arg(long = "ignore_extra_fields")]
    pub ignore_extra_fields: bool,

    /// Keep statements where only some of the variant conditions matched
    #[arg(long = "allow_partial_matches")]
    pub allow_partial_matches: bool,

    /// Check germline status for germline statement categories (default)
    #[arg(long = "match_germline", overrides_with = "no_match_germline")]
    pub match_germline: bool,

    #[arg(long = "no_match_germline", overrides_with = "match_germline")]
    pub no_match_germline: bool,

    /// Show progress bars
    #[arg(long)]
    pub interactive: bool,

    /// Settings file layered under the PORI_* environment variables
    #[arg(long, value_parser = existing_file)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// IPR username, falling back to the login user
    pub fn ipr_username(&self) -> anyhow::Result<String> {
        self.username
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
            .context("--username is required when IPR_USER and USER are not set")
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            generate_therapeutics: self.therapeutics,
            generate_comments: !self.skip_comments,
            match_germline: !self.no_match_germline,
            allow_partial_matches: self.allow_partial_matches,
            interactive: self.interactive,
            kb_match_filters: None,
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            async_upload: self.async_upload,
            mins_to_wait: self.mins_to_wait,
            ignore_extra_fields: self.ignore_extra_fields,
        }
    }

    /// Connection and run options from the settings and flags
    pub fn create_report_options(&self, settings: &Settings) -> anyhow::Result<CreateReportOptions> {
        let username = self.ipr_username()?;
        let graphkb_username = self.graphkb_username.clone().unwrap_or_else(|| username.clone());
        let graphkb_password = self
            .graphkb_password
            .clone()
            .unwrap_or_else(|| self.password.clone());

        let mut graphkb = settings.graphkb_config();
        if let Some(url) = self.graphkb_url.as_deref().filter(|u| !u.is_empty()) {
            graphkb.url = url.trim_end_matches('/').to_string();
        }
        let mut ipr = settings.ipr_config();
        if let Some(url) = self.ipr_url.as_deref().filter(|u| !u.is_empty()) {
            ipr.url = url.trim_end_matches('/').to_string();
        }

        Ok(CreateReportOptions {
            graphkb: graphkb.with_auth(&graphkb_username, &graphkb_password),
            ipr: ipr.with_auth(&username, &self.password),
            report: self.report_options(),
            upload: self.upload_options(),
            ipr_upload: !self.no_upload,
            output_json_path: self.output_json_path.clone(),
            always_write_output_json: self.always_write_output_json,
        })
    }

    /// The variant table files given on the command line, by report section
    fn variant_tables(&self) -> Vec<(&'static str, &Path)> {
        [
            ("smallMutations", &self.small_mutations),
            ("copyVariants", &self.copy_variants),
            ("structuralVariants", &self.structural_variants),
            ("expressionVariants", &self.expression_variants),
        ]
        .into_iter()
        .filter_map(|(section, path)| path.as_deref().map(|p| (section, p)))
        .collect()
    }

    /// Read the content JSON, replacing sections given as variant tables
    pub fn load_content(&self) -> anyhow::Result<Value> {
        let text = std::fs::read_to_string(&self.content)
            .with_context(|| format!("unable to read {}", self.content.display()))?;
        let mut content: Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", self.content.display()))?;

        for (section, path) in self.variant_tables() {
            let rows = load_variant_table(path)
                .with_context(|| format!("unable to load {}", path.display()))?;
            info!("loaded {} {} rows from {}", rows.len(), section, path.display());
            if let Some(map) = content.as_object_mut() {
                map.insert(section.to_string(), Value::Array(rows));
            }
        }
        Ok(content)
    }
}

/// Run the `ipr` command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut logging = LoggingConfig::from_level_name(&cli.log_level);
    if let Some(path) = &cli.log_file {
        logging = logging.with_log_file(path);
    }
    let _guard = init_logging(&logging).map_err(|e| anyhow::anyhow!("{}", e))?;

    let settings = Settings::load(cli.config.as_deref())?;
    let options = cli.create_report_options(&settings)?;
    let content = cli.load_content()?;

    create_report(content, &options).await?;
    Ok(())
}

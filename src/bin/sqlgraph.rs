//! sqlgraph: inspect, rewrite and run SQL through the statement graph.
//!
//! # Usage
//!
//! ```bash
//! # Canonical form of a statement
//! sqlgraph render "select o.id from orders o join customers c on o.customer_id = c.id"
//!
//! # Show targets, joins, fields and conditions
//! sqlgraph explain "SELECT * FROM orders WHERE total > :min::int" --param min=10
//!
//! # Run against the configured database
//! sqlgraph exec "SELECT * FROM orders WHERE id = :id::int" --param id=7
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sqlgraph::ast::{CondBody, CondId, FieldId, FieldKind, Query, QueryKind, TargetId};
use sqlgraph::config::Config;
use sqlgraph::engine::Connection;
use sqlgraph::params::{ParamContext, Parameter};
use sqlgraph::persist;
use sqlgraph::transpiler::{RenderOptions, render, render_condition, render_field};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlgraph")]
#[command(version)]
#[command(about = "Import SQL into a statement graph and render it back", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlgraph render 'SELECT t.x FROM tbl t WHERE t.x = 3'
    sqlgraph params 'UPDATE tbl SET x = :x::int WHERE id = :id::int'
    sqlgraph exec 'DELETE FROM tbl WHERE id = :id::int' --param id=5")]
struct Cli {
    /// Path to sqlgraph.toml
    #[arg(short, long, global = true, env = "SQLGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a statement and print its canonical SQL
    Render {
        sql: String,
        /// Parameter values (name=value)
        #[arg(short, long)]
        param: Vec<String>,
        /// One clause per line
        #[arg(long)]
        pretty: bool,
    },
    /// Print the graph built from a statement
    Explain {
        sql: String,
        #[arg(short, long)]
        param: Vec<String>,
    },
    /// List the parameters of a statement
    Params { sql: String },
    /// Print the persisted JSON form of a statement
    Dump { sql: String },
    /// Run a statement against the database
    Exec {
        sql: String,
        #[arg(short, long)]
        param: Vec<String>,
        /// Database connection URL (overrides [database] url)
        #[arg(long, env = "SQLGRAPH_DATABASE_URL")]
        url: Option<String>,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    match &cli.command {
        Commands::Render { sql, param, pretty } => {
            let query = import(&config, sql)?;
            let params = param_context(&query, param)?;
            let options = RenderOptions {
                pretty: *pretty,
                ..config.render_options()
            };
            println!("{}", render(&query, &params, &options)?);
        }
        Commands::Explain { sql, param } => {
            let query = import(&config, sql)?;
            let params = param_context(&query, param)?;
            explain(&query, &params, &config.render_options());
        }
        Commands::Params { sql } => {
            let query = import(&config, sql)?;
            print_parameters(&query.parameters());
        }
        Commands::Dump { sql } => {
            let query = import(&config, sql)?;
            println!("{}", persist::to_json(&query)?);
        }
        Commands::Exec {
            sql,
            param,
            url,
            format,
        } => {
            let query = import(&config, sql)?;
            let params = param_context(&query, param)?;
            let Some(url) = url.clone().or_else(|| config.database.url.clone()) else {
                bail!("No database URL. Use --url, SQLGRAPH_DATABASE_URL or [database] url");
            };
            let conn = Connection::connect(&url).await?;
            match query.kind() {
                QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                    let affected = conn.execute(&query, &params).await?;
                    println!("{} {} rows affected", "✓".green(), affected);
                }
                _ => {
                    let rows = conn.fetch_all(&query, &params).await?;
                    format_output(&rows, format);
                }
            }
        }
    }

    Ok(())
}

fn import(config: &Config, sql: &str) -> Result<Query> {
    let mut query = Query::new(Arc::new(config.catalog()));
    query.set_raw_text(sql)?;
    query.take_events();
    Ok(query)
}

fn param_context(query: &Query, pairs: &[String]) -> Result<ParamContext> {
    let ctx =
        ParamContext::parse_assignments(&query.parameters(), pairs.iter().map(String::as_str))?;
    Ok(ctx)
}

fn explain(query: &Query, params: &ParamContext, options: &RenderOptions) {
    let field_sql = |id: FieldId| {
        render_field(query, id, params, options).unwrap_or_else(|e| format!("<{}>", e))
    };

    println!("{} {}", "Kind:".dimmed(), query.kind().name().cyan().bold());

    if !query.targets().is_empty() {
        println!("{}", "Targets:".green().bold());
        for t in query.targets() {
            let entity = match t.sub_query() {
                Some(sub) => format!("(sub-query {})", sub),
                None => t.entity_name().to_string(),
            };
            println!("  {} {} {}", t.id().to_string().dimmed(), entity.white(), t.alias().cyan());
        }
    }

    if !query.joins().is_empty() {
        println!("{}", "Joins:".green().bold());
        for j in query.joins() {
            let alias = |t: Option<TargetId>| {
                t.and_then(|t| query.target(t))
                    .map(|t| t.alias())
                    .unwrap_or_else(|| "?".to_string())
            };
            let on = match j.condition() {
                Some(c) => render_condition(query, c, params, options)
                    .unwrap_or_else(|e| format!("<{}>", e)),
                None => "(implicit)".to_string(),
            };
            println!(
                "  {} {} {} {} ON {}",
                alias(j.target1()).white(),
                j.kind().sql().cyan(),
                alias(j.target2()).white(),
                j.id().to_string().dimmed(),
                on.yellow()
            );
        }
    }

    if !query.fields().is_empty() {
        println!("{}", "Fields:".green().bold());
        for f in query.fields() {
            let marker = if f.is_visible() { "•".green() } else { "◦".dimmed() };
            let alias = f.alias().map(|a| format!(" AS {}", a)).unwrap_or_default();
            let provider = match f.kind() {
                FieldKind::Column { .. } => f
                    .value_provider()
                    .map(|v| format!(" := {}", field_sql(v)))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            println!(
                "  {} {} {:10} {}{}{}",
                marker,
                f.id().to_string().dimmed(),
                f.kind().tag().cyan(),
                field_sql(f.id()).white(),
                alias,
                provider.yellow()
            );
        }
    }

    if let Some(root) = query.where_condition() {
        println!("{}", "Where:".green().bold());
        print_condition(query, root, 1, params, options);
    }

    if !query.order_by().is_empty() {
        println!("{}", "Order by:".green().bold());
        for o in query.order_by() {
            let dir = if o.ascending { "ASC" } else { "DESC" };
            println!("  {} {}", field_sql(o.field).white(), dir.cyan());
        }
    }

    let parameters = query.parameters();
    if !parameters.is_empty() {
        print_parameters(&parameters);
    }

    println!();
    println!("{}", "Generated SQL:".green().bold());
    match render(query, params, options) {
        Ok(sql) => println!("  {}", sql.white()),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

fn print_condition(
    query: &Query,
    id: CondId,
    depth: usize,
    params: &ParamContext,
    options: &RenderOptions,
) {
    let indent = "  ".repeat(depth);
    let Some(cond) = query.condition(id) else {
        return;
    };
    match cond.body() {
        CondBody::Node { children, .. } => {
            println!("{}{}", indent, cond.kind().code().cyan());
            for child in children {
                print_condition(query, *child, depth + 1, params, options);
            }
        }
        CondBody::Leaf { .. } => {
            let sql = render_condition(query, id, params, options)
                .unwrap_or_else(|e| format!("<{}>", e));
            println!("{}{}", indent, sql.white());
        }
    }
}

fn print_parameters(parameters: &[Parameter]) {
    if parameters.is_empty() {
        println!("{}", "(no parameters)".dimmed());
        return;
    }
    println!("{}", "Parameters:".green().bold());
    for p in parameters {
        let mut notes = Vec::new();
        if !p.nullable {
            notes.push("not null".to_string());
        }
        if let Some(default) = &p.default {
            notes.push(format!("default {}", default));
        }
        if let Some(descr) = &p.description {
            notes.push(descr.clone());
        }
        println!(
            "  {} {} {}",
            p.name.yellow(),
            p.value_type.to_string().cyan(),
            notes.join(", ").dimmed()
        );
    }
}

fn format_output(results: &[HashMap<String, serde_json::Value>], format: &OutputFormat) {
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        }
        OutputFormat::Table => {
            let mut columns: Vec<&String> = results[0].keys().collect();
            columns.sort();

            let mut widths: HashMap<&String, usize> =
                columns.iter().map(|c| (*c, c.len())).collect();
            for row in results {
                for (col, val) in row {
                    if let Some(w) = widths.get_mut(col) {
                        *w = (*w).max(val_to_string(val).len());
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .map(|c| format!("{:width$}", c, width = widths[*c]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in results {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let val = row.get(*c).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = widths[*c])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", results.len().to_string().cyan());
        }
    }
}

fn val_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use server_api::ApiContext;
use shared::{
    domain::{parse_widget_config, PageId, WidgetId},
    error::{ApiError, ApiException},
    protocol::{CreatePageRequest, CreateWidgetRequest, ReorderWidgetsRequest, UpdatePageRequest},
};
use storage::Storage;

/// Operator tool for the page store; runs the same operations as the HTTP server.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/pages.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreatePage {
        name: String,
        route: String,
        #[arg(long)]
        home: bool,
    },
    ListPages {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        per_page: Option<u32>,
    },
    SetHome {
        page_id: PageId,
    },
    DeletePage {
        page_id: PageId,
    },
    AddWidget {
        page_id: PageId,
        widget_type: String,
        #[arg(long)]
        position: Option<i64>,
        /// JSON object, e.g. '{"title":"Sale"}'.
        #[arg(long)]
        config: Option<String>,
    },
    ListWidgets {
        page_id: PageId,
        #[arg(long = "type")]
        widget_type: Option<String>,
    },
    Reorder {
        page_id: PageId,
        #[arg(required = true)]
        widget_ids: Vec<WidgetId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;
    let ctx = ApiContext::new(storage);

    match cli.command {
        Command::CreatePage { name, route, home } => {
            let page = server_api::create_page(
                &ctx,
                CreatePageRequest {
                    name,
                    route,
                    is_home: home,
                },
            )
            .await
            .map_err(api)?;
            print_json(&page)?;
        }
        Command::ListPages { page, per_page } => {
            let listing = server_api::list_pages(&ctx, page, per_page)
                .await
                .map_err(api)?;
            print_json(&listing)?;
        }
        Command::SetHome { page_id } => {
            let page = server_api::update_page(
                &ctx,
                page_id,
                UpdatePageRequest {
                    is_home: Some(true),
                    ..UpdatePageRequest::default()
                },
            )
            .await
            .map_err(api)?;
            print_json(&page)?;
        }
        Command::DeletePage { page_id } => {
            server_api::delete_page(&ctx, page_id).await.map_err(api)?;
            println!("deleted page {page_id}");
        }
        Command::AddWidget {
            page_id,
            widget_type,
            position,
            config,
        } => {
            let config =
                parse_widget_config(config.as_deref()).context("--config must be valid JSON")?;
            let widget = server_api::create_widget(
                &ctx,
                page_id,
                CreateWidgetRequest {
                    widget_type,
                    position,
                    config: Some(config),
                },
            )
            .await
            .map_err(api)?;
            print_json(&widget)?;
        }
        Command::ListWidgets {
            page_id,
            widget_type,
        } => {
            let widgets = server_api::list_widgets(&ctx, page_id, widget_type.as_deref())
                .await
                .map_err(api)?;
            print_json(&widgets)?;
        }
        Command::Reorder {
            page_id,
            widget_ids,
        } => {
            let reordered =
                server_api::reorder_widgets(&ctx, page_id, ReorderWidgetsRequest { widget_ids })
                    .await
                    .map_err(api)?;
            print_json(&reordered)?;
        }
    }

    Ok(())
}

fn api(error: ApiError) -> anyhow::Error {
    ApiException::from(error).into()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use shared::{
    domain::WidgetType,
    error::{ApiError, ErrorCode},
    protocol::{PageSummary, WidgetPayload},
};
use storage::{Storage, StoredPage, StoredWidget};
use tracing::error;

mod pages;
mod widgets;

pub use pages::{
    create_page, delete_page, home_page, list_pages, page_with_widgets, update_page,
    DEFAULT_PER_PAGE, MAX_PER_PAGE,
};
pub use widgets::{
    count_widgets, create_widget, delete_widget, list_widgets, next_widget_position,
    reorder_widgets, update_widget,
};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

fn page_summary(page: StoredPage) -> PageSummary {
    PageSummary {
        id: page.page_id,
        name: page.name,
        route: page.route,
        is_home: page.is_home,
        created_at: page.created_at,
        updated_at: page.updated_at,
    }
}

fn widget_payload(widget: StoredWidget) -> WidgetPayload {
    WidgetPayload {
        id: widget.widget_id,
        page_id: widget.page_id,
        widget_type: widget.widget_type,
        position: widget.position,
        config: widget.config,
        created_at: widget.created_at,
        updated_at: widget.updated_at,
    }
}

fn parse_widget_type(raw: &str) -> Result<WidgetType, ApiError> {
    raw.parse::<WidgetType>().map_err(|_| {
        ApiError::new(
            ErrorCode::Validation,
            format!(
                "invalid widget type '{raw}'; must be one of: {}",
                WidgetType::allowed_values()
            ),
        )
    })
}

/// Trims `raw` and rejects it when nothing is left.
fn required_text<'a>(raw: &'a str, message: &str) -> Result<&'a str, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, message));
    }
    Ok(trimmed)
}

const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "storage operation failed");
    ApiError::new(ErrorCode::Internal, INTERNAL_ERROR_MESSAGE)
}

#[cfg(test)]
#[path = "tests/pages_tests.rs"]
mod pages_tests;

#[cfg(test)]
#[path = "tests/widgets_tests.rs"]
mod widgets_tests;

use std::collections::HashSet;

use shared::{
    domain::{empty_widget_config, PageId, WidgetId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateWidgetRequest, ReorderWidgetsRequest, ReorderWidgetsResponse, UpdateWidgetRequest,
        WidgetListResponse, WidgetPayload,
    },
};
use storage::{NewWidget, ReorderOutcome, WidgetChanges};
use tracing::{info, warn};

use crate::{internal, pages::load_page, parse_widget_type, widget_payload, ApiContext};

/// Position value callers send to request "append after the last widget".
const UNSET_POSITION: i64 = 0;

pub async fn count_widgets(ctx: &ApiContext, page_id: PageId) -> Result<u64, ApiError> {
    ctx.storage
        .count_widgets_for_page(page_id)
        .await
        .map_err(internal)
}

/// One past the highest position on the page; 1 for an empty page.
pub async fn next_widget_position(ctx: &ApiContext, page_id: PageId) -> Result<i64, ApiError> {
    let max = ctx
        .storage
        .max_widget_position(page_id)
        .await
        .map_err(internal)?;
    Ok(max + 1)
}

pub async fn list_widgets(
    ctx: &ApiContext,
    page_id: PageId,
    type_filter: Option<&str>,
) -> Result<WidgetListResponse, ApiError> {
    load_page(ctx, page_id).await?;
    let widget_type = type_filter.map(parse_widget_type).transpose()?;

    let widgets = ctx
        .storage
        .list_widgets_for_page(page_id, widget_type)
        .await
        .map_err(internal)?;
    Ok(WidgetListResponse {
        total: widgets.len() as u64,
        widgets: widgets.into_iter().map(widget_payload).collect(),
    })
}

pub async fn create_widget(
    ctx: &ApiContext,
    page_id: PageId,
    request: CreateWidgetRequest,
) -> Result<WidgetPayload, ApiError> {
    load_page(ctx, page_id).await?;
    let widget_type = parse_widget_type(&request.widget_type)?;
    let requested_position = request.position.unwrap_or(UNSET_POSITION);
    ensure_position_not_negative(requested_position)?;

    // Explicit positions are stored as given, even when a sibling holds the
    // same value; only reorder produces a dense sequence.
    let position = if requested_position == UNSET_POSITION {
        next_widget_position(ctx, page_id).await?
    } else {
        requested_position
    };

    let widget = ctx
        .storage
        .insert_widget(&NewWidget {
            page_id,
            widget_type,
            position,
            config: request.config.unwrap_or_else(empty_widget_config),
        })
        .await
        .map_err(internal)?;
    Ok(widget_payload(widget))
}

/// Applies the supplied fields only. A supplied position is stored verbatim,
/// including 0; only negative values are rejected, and no sibling is moved.
pub async fn update_widget(
    ctx: &ApiContext,
    widget_id: WidgetId,
    request: UpdateWidgetRequest,
) -> Result<WidgetPayload, ApiError> {
    let existing = ctx
        .storage
        .get_widget(widget_id)
        .await
        .map_err(internal)?
        .ok_or_else(widget_not_found)?;

    let widget_type = request
        .widget_type
        .as_deref()
        .map(parse_widget_type)
        .transpose()?;
    if let Some(position) = request.position {
        ensure_position_not_negative(position)?;
    }
    let changes = WidgetChanges {
        widget_type,
        position: request.position,
        config: request.config,
    };
    if changes.is_empty() {
        return Ok(widget_payload(existing));
    }

    let updated = ctx
        .storage
        .update_widget(widget_id, &changes)
        .await
        .map_err(internal)?
        .ok_or_else(widget_not_found)?;
    Ok(widget_payload(updated))
}

/// Removes one widget. Remaining positions keep their gaps until the next reorder.
pub async fn delete_widget(ctx: &ApiContext, widget_id: WidgetId) -> Result<(), ApiError> {
    let deleted = ctx
        .storage
        .delete_widget(widget_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(widget_not_found());
    }
    info!(%widget_id, "widget deleted");
    Ok(())
}

/// Rewrites every widget position on the page to follow `widget_ids`.
///
/// The list must name each widget of the page exactly once. Duplicates and
/// count mismatches are rejected before anything is written; a widget that
/// turns out to live on another page aborts the whole transaction. On success
/// the widgets come back in their new order with positions `1..=N`.
pub async fn reorder_widgets(
    ctx: &ApiContext,
    page_id: PageId,
    request: ReorderWidgetsRequest,
) -> Result<ReorderWidgetsResponse, ApiError> {
    load_page(ctx, page_id).await?;

    let widget_ids = request.widget_ids;
    if widget_ids.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "widget_ids cannot be empty",
        ));
    }

    let mut seen = HashSet::with_capacity(widget_ids.len());
    for widget_id in &widget_ids {
        if !seen.insert(*widget_id) {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("duplicate widget ID {widget_id} in the list"),
            ));
        }
    }

    let supplied = widget_ids.len() as u64;
    let on_page = count_widgets(ctx, page_id).await?;
    if supplied != on_page {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!(
                "widget count mismatch: page has {on_page} widgets but {supplied} IDs were supplied"
            ),
        ));
    }

    match ctx
        .storage
        .reorder_widgets(page_id, &widget_ids)
        .await
        .map_err(internal)?
    {
        ReorderOutcome::Applied => {}
        ReorderOutcome::WidgetNotOnPage(widget_id) => {
            warn!(%page_id, %widget_id, "reorder rejected: widget not on page");
            return Err(ApiError::new(
                ErrorCode::Conflict,
                format!("widget {widget_id} not found on page {page_id}"),
            ));
        }
        ReorderOutcome::CountChanged { expected, actual } => {
            warn!(%page_id, expected, actual, "reorder rejected: widget count changed");
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!(
                    "widget count mismatch: page now has {actual} widgets but {expected} IDs were supplied; re-fetch and retry"
                ),
            ));
        }
    }

    let widgets = ctx
        .storage
        .list_widgets_for_page(page_id, None)
        .await
        .map_err(internal)?;
    info!(%page_id, widgets = widgets.len(), "widgets reordered");
    Ok(ReorderWidgetsResponse {
        widgets: widgets.into_iter().map(widget_payload).collect(),
    })
}

fn ensure_position_not_negative(position: i64) -> Result<(), ApiError> {
    if position < 0 {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "widget position must not be negative",
        ));
    }
    Ok(())
}

fn widget_not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "widget not found")
}

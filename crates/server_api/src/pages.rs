use shared::{
    domain::PageId,
    error::{ApiError, ErrorCode},
    protocol::{CreatePageRequest, PageDetail, PageListResponse, PageSummary, UpdatePageRequest},
};
use storage::{is_route_conflict, PageChanges, StoredPage};
use tracing::info;

use crate::{internal, page_summary, required_text, widget_payload, ApiContext};

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

const HOME_PAGE_DELETE_MESSAGE: &str =
    "cannot delete the home page; set another page as home first";

pub async fn list_pages(
    ctx: &ApiContext,
    page: Option<u32>,
    per_page: Option<u32>,
) -> Result<PageListResponse, ApiError> {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let offset = u64::from(page - 1) * u64::from(per_page);

    let total = ctx.storage.count_pages().await.map_err(internal)?;
    let pages = ctx
        .storage
        .list_pages(per_page, offset)
        .await
        .map_err(internal)?;
    let total_pages = u32::try_from(total.div_ceil(u64::from(per_page))).unwrap_or(u32::MAX);

    Ok(PageListResponse {
        pages: pages.into_iter().map(page_summary).collect(),
        total,
        page,
        per_page,
        total_pages,
    })
}

/// The page with its widgets in position order, or `None` when it does not exist.
pub async fn page_with_widgets(
    ctx: &ApiContext,
    page_id: PageId,
) -> Result<Option<PageDetail>, ApiError> {
    let Some(page) = ctx.storage.get_page(page_id).await.map_err(internal)? else {
        return Ok(None);
    };
    let widgets = ctx
        .storage
        .list_widgets_for_page(page_id, None)
        .await
        .map_err(internal)?;
    Ok(Some(PageDetail {
        page: page_summary(page),
        widgets: widgets.into_iter().map(widget_payload).collect(),
    }))
}

pub async fn home_page(ctx: &ApiContext) -> Result<Option<PageSummary>, ApiError> {
    let page = ctx.storage.home_page().await.map_err(internal)?;
    Ok(page.map(page_summary))
}

pub async fn create_page(
    ctx: &ApiContext,
    request: CreatePageRequest,
) -> Result<PageSummary, ApiError> {
    let name = required_text(&request.name, "page name is required and cannot be empty")?;
    let route = required_text(&request.route, "page route is required and cannot be empty")?;
    ensure_route_available(ctx, route, None).await?;

    let page = ctx
        .storage
        .create_page(name, route, request.is_home)
        .await
        .map_err(write_error)?;
    if page.is_home {
        info!(page_id = %page.page_id, route = %page.route, "home page assigned");
    }
    Ok(page_summary(page))
}

/// Applies the supplied fields only. Promoting a page to home demotes the
/// previous home page atomically with the update.
pub async fn update_page(
    ctx: &ApiContext,
    page_id: PageId,
    request: UpdatePageRequest,
) -> Result<PageSummary, ApiError> {
    let existing = load_page(ctx, page_id).await?;

    let mut changes = PageChanges::default();
    if let Some(name) = request.name.as_deref() {
        changes.name = Some(required_text(name, "page name cannot be empty")?.to_string());
    }
    if let Some(route) = request.route.as_deref() {
        let route = required_text(route, "page route cannot be empty")?;
        ensure_route_available(ctx, route, Some(page_id)).await?;
        changes.route = Some(route.to_string());
    }
    changes.is_home = request.is_home;

    if changes.is_empty() {
        return Ok(page_summary(existing));
    }

    let updated = ctx
        .storage
        .update_page(page_id, &changes)
        .await
        .map_err(write_error)?
        .ok_or_else(page_not_found)?;
    if updated.is_home && !existing.is_home {
        info!(%page_id, route = %updated.route, "home page reassigned");
    }
    Ok(page_summary(updated))
}

/// Deletes a non-home page; its widgets are removed by the storage cascade.
pub async fn delete_page(ctx: &ApiContext, page_id: PageId) -> Result<(), ApiError> {
    let page = load_page(ctx, page_id).await?;
    if page.is_home {
        return Err(ApiError::new(ErrorCode::Conflict, HOME_PAGE_DELETE_MESSAGE));
    }

    let deleted = ctx.storage.delete_page(page_id).await.map_err(internal)?;
    if !deleted {
        // Removed or promoted to home between the check and the delete.
        return match ctx.storage.get_page(page_id).await.map_err(internal)? {
            Some(_) => Err(ApiError::new(ErrorCode::Conflict, HOME_PAGE_DELETE_MESSAGE)),
            None => Err(page_not_found()),
        };
    }

    info!(%page_id, route = %page.route, "page deleted");
    Ok(())
}

pub(crate) async fn load_page(ctx: &ApiContext, page_id: PageId) -> Result<StoredPage, ApiError> {
    ctx.storage
        .get_page(page_id)
        .await
        .map_err(internal)?
        .ok_or_else(page_not_found)
}

pub(crate) fn page_not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "page not found")
}

async fn ensure_route_available(
    ctx: &ApiContext,
    route: &str,
    excluding: Option<PageId>,
) -> Result<(), ApiError> {
    let taken = ctx
        .storage
        .route_exists(route, excluding)
        .await
        .map_err(internal)?;
    if taken {
        return Err(route_taken());
    }
    Ok(())
}

fn route_taken() -> ApiError {
    ApiError::new(ErrorCode::Conflict, "page route already exists")
}

// A concurrent writer can claim the route after the EXISTS check; the UNIQUE
// constraint then surfaces here.
fn write_error(err: anyhow::Error) -> ApiError {
    if is_route_conflict(&err) {
        return route_taken();
    }
    internal(err)
}

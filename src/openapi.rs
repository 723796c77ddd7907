use utoipa::OpenApi;

use crate::config::PriceEntry;
use crate::models::OrderStatus;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::create_order,
        routes::order_status,
        routes::user_orders,
        routes::order_detail,
        routes::prices,
    ),
    components(schemas(
        routes::OrderIn,
        routes::OrderCreated,
        routes::OrderStatusOut,
        routes::OrderSummary,
        routes::OrderDetail,
        PriceEntry,
        OrderStatus,
    )),
    tags(
        (name = "orders", description = "Order intake and lookups"),
        (name = "prices", description = "Public price table"),
    )
)]
pub struct ApiDoc;

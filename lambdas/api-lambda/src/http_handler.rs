use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use movie_master_shared::{
    documents,
    filter::{Filter, MovieQuery, UserQuery},
    response,
    types::Collection,
    AppState,
};
use std::sync::Arc;

const GREETING: &str = "Hello World!";

/// Main handler - routes requests to collection operations
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!("{} {}", method, path);

    // Handle CORS preflight
    if *method == Method::OPTIONS {
        return response::preflight();
    }

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (collection, id) = match parts.as_slice() {
        [] if *method == Method::GET => return response::text(StatusCode::OK, GREETING),
        [name] => (collection_for(name), None),
        [name, id] => (collection_for(name), Some(*id)),
        _ => (None, None),
    };

    let Some(collection) = collection else {
        tracing::warn!("No route matched - Method: {} Path: {}", method, path);
        return response::not_found();
    };
    let store = state.store.as_ref();

    match (method, id) {
        // GET /{collection} - list, filtered by query string
        (&Method::GET, None) => {
            let filter = list_filter(&event, collection);
            documents::list(store, collection, filter).await
        }
        // GET /{collection}/{id}
        (&Method::GET, Some(id)) => documents::get(store, collection, id).await,
        // POST /{collection}
        (&Method::POST, None) => documents::create(store, collection, body).await,
        // PATCH /{collection}/{id}
        (&Method::PATCH, Some(id)) => documents::update(store, collection, id, body).await,
        // DELETE /{collection}/{id}
        (&Method::DELETE, Some(id)) => documents::delete(store, collection, id).await,
        _ => response::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    }
}

fn collection_for(segment: &str) -> Option<Collection> {
    match segment {
        "movies" => Some(Collection::Movies),
        "users" => Some(Collection::Users),
        _ => None,
    }
}

fn list_filter(event: &Request, collection: Collection) -> Filter {
    let param = |key: &str| {
        event
            .query_string_parameters_ref()
            .and_then(|params| params.first(key))
            .map(str::to_string)
    };

    match collection {
        Collection::Movies => MovieQuery::from_params(param).into_filter(),
        Collection::Users => UserQuery::from_params(param).into_filter(),
    }
}

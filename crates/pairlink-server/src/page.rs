//! HTML page embedding a pairing code.

use axum::response::Html;

/// Minimal page showing `data_url` as an image under `heading`.
pub fn pairing_page(heading: &str, data_url: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>Pairing code</title></head>\n\
         <body>\n\
         <h1>{heading}</h1>\n\
         <img src=\"{data_url}\" alt=\"Pairing code\"/>\n\
         </body>\n\
         </html>\n"
    ))
}

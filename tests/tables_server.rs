//! HTTP behaviour of the table endpoint with a stub extractor, checking the
//! returned workbook with calamine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use calamine::{open_workbook_from_rs, Reader, Xlsx};
use pdf_toolbelt::server::{BODY_LIMIT_BYTES, EXTRACT_PATH};
use pdf_toolbelt::{router, ExtractedTable, ServerState, TableError, TableExtractor};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpListener;

const ORIGIN: &str = "https://app.example.com";

/// Returns canned tables, or none when the PDF bytes say `EMPTY`.
struct Canned;

impl TableExtractor for Canned {
    fn extract(&self, pdf: &[u8]) -> Result<Vec<ExtractedTable>, TableError> {
        if pdf == b"EMPTY" {
            return Ok(Vec::new());
        }
        if pdf == b"PANIC" {
            panic!("extractor crashed");
        }
        if pdf == b"CORRUPT" {
            return Err(TableError::InvalidPdf("not a PDF".into()));
        }
        let small = vec![
            vec!["Name".to_string(), "Qty".to_string()],
            vec!["Bolts".to_string(), "12".to_string()],
            vec!["Nuts".to_string(), "30".to_string()],
        ];
        let wide: Vec<Vec<String>> = (0..5)
            .map(|r| (0..4).map(|c| format!("r{r}c{c}")).collect())
            .collect();
        Ok(vec![
            ExtractedTable::from_grid(1, 1, small).unwrap(),
            ExtractedTable::from_grid(2, 1, wide).unwrap(),
        ])
    }
}

async fn serve() -> String {
    serve_with_limit(BODY_LIMIT_BYTES).await
}

async fn serve_with_limit(limit: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new(Arc::new(Canned), ORIGIN)
        .unwrap()
        .with_body_limit(limit);
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

async fn post(base: &str, body: Value) -> (StatusCode, reqwest::header::HeaderMap, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}{EXTRACT_PATH}"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    (status, headers, resp.json().await.unwrap())
}

#[tokio::test]
async fn tables_come_back_with_a_workbook() {
    let base = serve().await;
    let (status, headers, body) = post(
        &base,
        json!({"pdf_data": STANDARD.encode(b"%PDF"), "filename": "stock.pdf"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["access-control-allow-origin"], ORIGIN);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "Successfully extracted 2 table(s) from stock.pdf"
    );
    assert_eq!(body["tables"][0]["rows"], 3);
    assert_eq!(body["tables"][0]["columns"], 2);
    assert_eq!(body["tables"][1]["page_number"], 2);
    assert_eq!(body["tables"][1]["data"][4][3], "r4c3");

    let xlsx = STANDARD
        .decode(body["excel_data"].as_str().unwrap())
        .unwrap();
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(xlsx)).unwrap();
    assert_eq!(workbook.sheet_names(), vec!["Table_1", "Table_2"]);

    let first = workbook.worksheet_range("Table_1").unwrap();
    assert_eq!(first.get_size(), (3, 2));
    assert_eq!(first.get_value((2, 0)).unwrap().to_string(), "Nuts");

    let second = workbook.worksheet_range("Table_2").unwrap();
    assert_eq!(second.get_size(), (5, 4));
}

#[tokio::test]
async fn default_filename_in_message() {
    let base = serve().await;
    let (_, _, body) = post(&base, json!({"pdf_data": STANDARD.encode(b"%PDF")})).await;
    assert_eq!(
        body["message"],
        "Successfully extracted 2 table(s) from document.pdf"
    );
}

#[tokio::test]
async fn missing_pdf_data_is_bad_request() {
    let base = serve().await;
    let (status, headers, body) = post(&base, json!({"filename": "x.pdf"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers["access-control-allow-origin"], ORIGIN);
    assert_eq!(body, json!({"success": false, "error": "No PDF data provided"}));

    let (status, _, _) = post(&base, json!({"pdf_data": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn no_tables_is_a_soft_failure() {
    let base = serve().await;
    let (status, _, body) = post(&base, json!({"pdf_data": STANDARD.encode(b"EMPTY")})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": false, "error": "No tables found in the PDF", "tables": []})
    );
}

#[tokio::test]
async fn undecodable_input_is_a_server_error() {
    let base = serve().await;

    let (status, _, body) = post(&base, json!({"pdf_data": "@@not base64@@"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Error processing PDF:"));

    let (status, _, body) = post(&base, json!({"pdf_data": STANDARD.encode(b"CORRUPT")})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("not a PDF"));
}

#[tokio::test]
async fn extractor_panic_is_a_server_error() {
    let base = serve().await;
    let (status, _, body) = post(&base, json!({"pdf_data": STANDARD.encode(b"PANIC")})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["tables"], json!([]));

    // The server keeps serving after the panic.
    let (status, _, _) = post(&base, json!({"pdf_data": STANDARD.encode(b"EMPTY")})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_json_is_a_server_error() {
    let base = serve().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}{EXTRACT_PATH}"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn oversized_body_is_a_json_error() {
    let base = serve_with_limit(1024).await;
    let big = STANDARD.encode(vec![b'%'; 4096]);

    let (status, headers, body) = post(&base, json!({"pdf_data": big})).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(headers["access-control-allow-origin"], ORIGIN);
    assert_eq!(body["success"], false);
    assert_eq!(body["tables"], json!([]));
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("length limit exceeded"));

    // Bodies under the limit are still served.
    let (status, _, _) = post(&base, json!({"pdf_data": STANDARD.encode(b"EMPTY")})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn preflight_and_method_handling() {
    let base = serve().await;
    let client = reqwest::Client::new();
    let url = format!("{base}{EXTRACT_PATH}");

    let resp = client
        .request(reqwest::Method::OPTIONS, &url)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["access-control-allow-methods"], "POST, OPTIONS, GET");
    assert_eq!(resp.headers()["access-control-max-age"], "86400");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "CORS preflight");

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()["access-control-allow-origin"], ORIGIN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Method not allowed");

    let resp = client.get(format!("{base}/elsewhere")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "Not Found");
}

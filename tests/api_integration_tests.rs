// API Integration Tests
//
// Purpose: Exercise every endpoint through the router, with a mock vision
// backend on an ephemeral port standing in for the image analysis service.
// Run with: cargo test --test api_integration_tests

#[cfg(feature = "api")]
mod api_tests {
    use axum::{
        body::Body,
        extract::Multipart,
        http::{Request, StatusCode},
        response::Json,
        routing::post,
        Router,
    };
    use approx::assert_relative_eq;
    use npk_mixer::config::ServerConfig;
    use npk_mixer::{AppState, create_router};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt; // for oneshot

    const BOUNDARY: &str = "npkmixerboundary";

    // =========================================================================
    // Mock vision backend
    // =========================================================================

    /// Echoes the received threshold as the N score so tests can see which
    /// request produced a result.
    async fn mock_analyze(mut multipart: Multipart) -> Json<Value> {
        let mut threshold = 0.0;
        let mut cropped = false;

        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => assert!(!field.bytes().await.unwrap().is_empty()),
                "threshold" => threshold = field.text().await.unwrap().parse().unwrap(),
                "points" => {
                    let points: Value = serde_json::from_str(&field.text().await.unwrap()).unwrap();
                    assert_eq!(points.as_array().unwrap().len(), 4);
                    cropped = true;
                }
                _ => {}
            }
        }

        let filler = if cropped { 30.0 } else { 20.0 };

        Json(json!({
            "image_b64": "aGVsbG8=",
            "raw_cropped_b64": "aGVsbG8=",
            "areas": {
                "N": threshold,
                "P": 10.0,
                "K": 10.0,
                "Filler": filler,
            },
            "histogram": vec![1u32; 256],
            "auto_threshold": 60,
        }))
    }

    /// Answers well after the request so a session change can overtake it.
    async fn mock_analyze_slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_millis(400)).await;
        Json(json!({
            "image_b64": "aGVsbG8=",
            "areas": {"N": 99.0, "P": 1.0, "K": 1.0, "Filler": 1.0},
            "histogram": vec![1u32; 256],
            "auto_threshold": 200,
        }))
    }

    async fn spawn_mock_vision() -> String {
        let app = Router::new()
            .route("/analyze", post(mock_analyze))
            .route("/slow", post(mock_analyze_slow))
            .route("/fail", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn create_test_app(vision_url: String, debounce: Duration) -> Router {
        let config = ServerConfig {
            vision_url,
            vision_timeout: Duration::from_secs(5),
            debounce,
            ..ServerConfig::default()
        };
        let state = AppState::new(&config).expect("Failed to build app state");
        create_router(state)
    }

    fn offline_app() -> Router {
        create_test_app("http://127.0.0.1:9/analyze".to_string(), Duration::from_millis(10))
    }

    async fn json_response(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        serde_json::from_slice(&body).expect("Failed to parse JSON")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_multipart(uri: &str, fields: &[(&str, &str)], file: Option<&[u8]>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"batch.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    const FULL_FRAME: &str = r#"[{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}]"#;

    // =========================================================================
    // Section 1: Health Check
    // =========================================================================

    #[tokio::test]
    async fn test_health_check() {
        let response = offline_app().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_response(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
    }

    // =========================================================================
    // Section 2: Recipe Solving
    // =========================================================================

    #[tokio::test]
    async fn test_solve_balanced_target() {
        let app = offline_app();
        let request = json!({"n": 15.0, "p": 15.0, "k": 15.0, "weight": 100.0});
        let response = app.oneshot(post_json("/api/recipe/solve", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_response(response).await;
        assert_eq!(body["ok"], true);

        let plan = &body["plan"];
        assert_relative_eq!(plan["phosphorus_source"].as_f64().unwrap(), 15.0 / 0.46, epsilon = 1e-9);
        assert_relative_eq!(plan["nitrogen_source"].as_f64().unwrap(), 19.848771, epsilon = 1e-4);
        assert_relative_eq!(plan["potassium_source"].as_f64().unwrap(), 25.0, epsilon = 1e-9);
        assert_relative_eq!(plan["filler"].as_f64().unwrap(), 22.542533, epsilon = 1e-4);

        let rows = body["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0]["material"], "Urea");

        assert_relative_eq!(body["delivered"]["n"].as_f64().unwrap(), 15.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_solve_is_cached() {
        let app = offline_app();
        let request = json!({"n": 10.0, "p": 20.0, "k": 10.0, "weight": 50.0});

        let first = json_response(app.clone().oneshot(post_json("/api/recipe/solve", request.clone())).await.unwrap()).await;
        let second = json_response(app.oneshot(post_json("/api/recipe/solve", request)).await.unwrap()).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_solve_nitrogen_oversupply() {
        let app = offline_app();
        let request = json!({"n": 5.0, "p": 50.0, "k": 0.0, "weight": 100.0});
        let response = app.oneshot(post_json("/api/recipe/solve", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json_response(response).await;
        assert_eq!(body["kind"], "nitrogen_oversupply");
        assert!(body["error"].as_str().unwrap().starts_with("Impossible"));
    }

    #[tokio::test]
    async fn test_solve_over_concentration() {
        let app = offline_app();
        let request = json!({"n": 40.0, "p": 40.0, "k": 40.0});
        let response = app.oneshot(post_json("/api/recipe/solve", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json_response(response).await;
        assert_eq!(body["kind"], "over_concentration");
        assert!(body["error"].as_str().unwrap().contains("exceed 100%"));
    }

    #[tokio::test]
    async fn test_solve_rejects_negative_input() {
        let app = offline_app();
        let request = json!({"n": -1.0, "p": 10.0, "k": 10.0, "weight": 100.0});
        let response = app.oneshot(post_json("/api/recipe/solve", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_solve() {
        let app = offline_app();
        let request = json!({"targets": [
            {"n": 15.0, "p": 15.0, "k": 15.0, "weight": 100.0},
            {"n": 5.0, "p": 50.0, "k": 0.0, "weight": 100.0},
            {"n": 40.0, "p": 40.0, "k": 40.0, "weight": 100.0},
        ]});
        let response = app.oneshot(post_json("/api/recipe/batch", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_response(response).await;
        assert_eq!(body["count"], 3);
        assert_eq!(body["feasible"], 1);

        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["ok"], true);
        assert_eq!(results[1]["kind"], "nitrogen_oversupply");
        assert_eq!(results[2]["kind"], "over_concentration");
    }

    // =========================================================================
    // Section 3: Evaluation, Target Editing, Share Links
    // =========================================================================

    #[tokio::test]
    async fn test_evaluate_composition() {
        let app = offline_app();
        let request = json!({
            "scores": {"n": 2.0, "p": 1.0, "k": 1.0, "filler": 4.0},
            "weight": 200.0,
            "target": {"n": 23.0, "p": 14.5, "k": 12.5, "filler": 50.0},
        });
        let response = app.oneshot(post_json("/api/composition/evaluate", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_response(response).await;
        assert_eq!(body["all_within_tolerance"], true);
        assert_eq!(body["evaluation"]["masses"]["filler"].as_f64(), Some(100.0));

        let report = body["report"].as_array().unwrap();
        assert_eq!(report.len(), 4);
        assert_eq!(report[0]["label"], "N (Urea)");
        assert_eq!(report[0]["deviation"].as_f64(), Some(2.0));
    }

    #[tokio::test]
    async fn test_evaluate_zero_signal() {
        let app = offline_app();
        let request = json!({
            "scores": {"n": 0.0, "p": 0.0, "k": 0.0, "filler": 0.0},
            "weight": 100.0,
        });
        let body = json_response(app.oneshot(post_json("/api/composition/evaluate", request)).await.unwrap()).await;
        assert_eq!(body["evaluation"]["percentages"]["n"].as_f64(), Some(0.0));
        assert_eq!(body["all_within_tolerance"], false);
    }

    #[tokio::test]
    async fn test_evaluate_rejects_invalid_scores() {
        let app = offline_app();
        let request = json!({
            "scores": {"n": -1.0, "p": 1.0, "k": 1.0, "filler": 4.0},
            "weight": 100.0,
        });
        let response = app.clone().oneshot(post_json("/api/composition/evaluate", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_response(response).await;
        assert!(body["error"].as_str().unwrap().contains("N (Urea)"));

        let request = json!({
            "scores": {"n": 1.0, "p": 1.0, "k": 1.0, "filler": -0.5},
            "weight": 100.0,
        });
        let response = app.oneshot(post_json("/api/composition/evaluate", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_target_edit_filler_policy() {
        let app = offline_app();

        let request = json!({
            "target": {"n": 15.0, "p": 15.0, "k": 15.0, "filler": 55.0},
            "field": "n",
            "value": 20.0,
        });
        let body = json_response(app.clone().oneshot(post_json("/api/target/edit", request)).await.unwrap()).await;
        assert_eq!(body["target"]["filler"].as_f64(), Some(50.0));
        assert_eq!(body["grade"], "20-15-15");

        let request = json!({
            "target": body["target"].clone(),
            "field": "filler",
            "value": 10.0,
        });
        let body = json_response(app.oneshot(post_json("/api/target/edit", request)).await.unwrap()).await;
        assert_eq!(body["target"]["filler"].as_f64(), Some(10.0));
        assert_eq!(body["target"]["n"].as_f64(), Some(20.0));
        assert_eq!(body["total"].as_f64(), Some(60.0));
    }

    #[tokio::test]
    async fn test_share_link_defaults_missing_params() {
        let app = offline_app();
        let body = json_response(app.oneshot(get("/api/share?n=12.5&weight=50")).await.unwrap()).await;

        assert_eq!(body["target"]["n"].as_f64(), Some(12.5));
        assert_eq!(body["target"]["p"].as_f64(), Some(15.0));
        assert_eq!(body["target"]["filler"].as_f64(), Some(57.5));
        assert_eq!(body["weight"].as_f64(), Some(50.0));
        assert_eq!(body["query"], "n=12.5&p=15&k=15&weight=50");
    }

    // =========================================================================
    // Section 4: One-shot Analysis
    // =========================================================================

    #[tokio::test]
    async fn test_analyze_forwards_to_backend() {
        let base = spawn_mock_vision().await;
        let app = create_test_app(format!("{}/analyze", base), Duration::from_millis(10));

        let fields = [("threshold", "40"), ("points", FULL_FRAME), ("n", "40"), ("weight", "80")];
        let response = app
            .oneshot(post_multipart("/api/analyze", &fields, Some(b"jpeg bytes")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_response(response).await;
        assert_eq!(body["scores"]["n"].as_f64(), Some(40.0));
        assert_eq!(body["scores"]["filler"].as_f64(), Some(30.0));
        assert_eq!(body["auto_threshold"], 60);

        // 40 / 90 of 80 kg
        let result = &body["result"];
        assert_relative_eq!(result["evaluation"]["masses"]["n"].as_f64().unwrap(), 80.0 * 40.0 / 90.0, epsilon = 1e-9);
        assert_eq!(result["target"]["n"].as_f64(), Some(40.0));
        assert_eq!(result["target"]["filler"].as_f64(), Some(30.0));
    }

    #[tokio::test]
    async fn test_analyze_backend_failure() {
        let base = spawn_mock_vision().await;
        let app = create_test_app(format!("{}/fail", base), Duration::from_millis(10));

        let response = app
            .oneshot(post_multipart("/api/analyze", &[("threshold", "35")], Some(b"jpeg bytes")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = json_response(response).await;
        assert_eq!(body["error"], "Backend connection failed.");
    }

    #[tokio::test]
    async fn test_analyze_requires_file() {
        let response = offline_app()
            .oneshot(post_multipart("/api/analyze", &[("threshold", "35")], None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_rejects_bad_threshold() {
        let response = offline_app()
            .oneshot(post_multipart("/api/analyze", &[("threshold", "300")], Some(b"jpeg bytes")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // =========================================================================
    // Section 5: Analyzer Session
    // =========================================================================

    #[tokio::test]
    async fn test_session_first_load_adopts_auto_threshold() {
        let base = spawn_mock_vision().await;
        let app = create_test_app(format!("{}/analyze", base), Duration::from_millis(10));

        let response = app
            .oneshot(post_multipart("/api/session/image", &[("points", FULL_FRAME)], Some(b"jpeg bytes")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_response(response).await;
        let session = &body["session"];
        assert_eq!(session["threshold"], 60);
        assert_eq!(session["auto_threshold"], 60);
        // Image selection and the analysis it triggers each take a sequence number
        assert_eq!(session["latest_request"], 2);
        assert_eq!(session["loading"], false);
        assert_eq!(session["histogram"].as_array().unwrap().len(), 256);
        // Request went out with the default threshold
        assert_eq!(session["analysis"]["scores"]["n"].as_f64(), Some(35.0));
        assert!(body["evaluation"]["report"].is_array());
    }

    #[tokio::test]
    async fn test_session_threshold_burst_is_debounced() {
        let base = spawn_mock_vision().await;
        let app = create_test_app(format!("{}/analyze", base), Duration::from_millis(50));

        app.clone()
            .oneshot(post_multipart("/api/session/image", &[], Some(b"jpeg bytes")))
            .await
            .unwrap();

        for threshold in [10, 20, 30] {
            let response = app
                .clone()
                .oneshot(post_json("/api/session/threshold", json!({"threshold": threshold})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        let body = json_response(app.oneshot(get("/api/session")).await.unwrap()).await;
        let session = &body["session"];
        assert_eq!(session["latest_request"], 3);
        assert_eq!(session["threshold"], 30);
        assert_eq!(session["analysis"]["scores"]["n"].as_f64(), Some(30.0));
        // Not a first load: auto threshold stays from the upload
        assert_eq!(session["auto_threshold"], 60);
    }

    #[tokio::test]
    async fn test_session_backend_failure() {
        let base = spawn_mock_vision().await;
        let app = create_test_app(format!("{}/fail", base), Duration::from_millis(10));

        let body = json_response(
            app.oneshot(post_multipart("/api/session/image", &[], Some(b"jpeg bytes")))
                .await
                .unwrap(),
        )
        .await;
        let session = &body["session"];
        assert_eq!(session["last_error"], "Backend connection failed.");
        assert_eq!(session["loading"], false);
        assert!(session["analysis"].is_null());
        assert!(body["evaluation"].is_null());
    }

    #[tokio::test]
    async fn test_seed_discards_in_flight_analysis() {
        let base = spawn_mock_vision().await;
        let app = create_test_app(format!("{}/slow", base), Duration::from_millis(10));

        let upload = tokio::spawn(
            app.clone()
                .oneshot(post_multipart("/api/session/image", &[], Some(b"jpeg bytes"))),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = app
            .clone()
            .oneshot(Request::builder().method("POST").uri("/api/session/seed?n=10&p=10&k=10&weight=50").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        upload.await.unwrap().unwrap();

        let body = json_response(app.oneshot(get("/api/session")).await.unwrap()).await;
        let session = &body["session"];
        assert!(session["analysis"].is_null());
        assert!(session["histogram"].as_array().unwrap().iter().all(|count| count == 0));
        assert_eq!(session["threshold"], 35);
        assert_eq!(session["auto_threshold"], 35);
        assert_eq!(session["loading"], false);
        assert_eq!(session["total_weight"].as_f64(), Some(50.0));
        assert_eq!(body["share_query"], "n=10&p=10&k=10&weight=50");
        assert!(body["evaluation"].is_null());
    }

    #[tokio::test]
    async fn test_session_seed_and_edit() {
        let app = offline_app();

        let body = json_response(
            app.clone()
                .oneshot(Request::builder().method("POST").uri("/api/session/seed?n=5&p=50&k=0&weight=20").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["session"]["total_weight"].as_f64(), Some(20.0));
        assert_eq!(body["recipe"]["ok"], false);
        assert_eq!(body["recipe"]["kind"], "nitrogen_oversupply");

        let body = json_response(
            app.clone()
                .oneshot(post_json("/api/session/target", json!({"field": "p", "value": 10.0})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["recipe"]["ok"], true);
        assert_eq!(body["session"]["target"]["filler"].as_f64(), Some(85.0));
        assert_eq!(body["share_query"], "n=5&p=10&k=0&weight=20");

        let body = json_response(
            app.oneshot(post_json("/api/session/weight", json!({"weight": 40.0})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["session"]["total_weight"].as_f64(), Some(40.0));
    }

    #[tokio::test]
    async fn test_session_crop_without_image() {
        let app = offline_app();
        let response = app
            .oneshot(post_json("/api/session/crop", json!({"points": null})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

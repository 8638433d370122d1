//! The resigning binary cache proxy.
//!
//! A single wildcard route serves every object of the backing cache.
//! Manifests (`*.narinfo`) are decoded, run through the resigning policy,
//! and re-encoded on the way out; everything else streams through
//! untouched. HEAD mirrors GET in status and headers but never carries a
//! body.

use std::sync::Arc;

use axum::{
    body::{self, StreamBody},
    extract::{Extension, Path},
    http::{header, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;
use tracing::instrument;

use common::storage::{Download, ObjectStat, StorageBackend};
use common::{mime, NarInfo, ResignOutcome};

use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::State;

/// The cache metadata document served from the cache root.
const NIX_CACHE_INFO_NAME: &str = "nix-cache-info";

pub fn router() -> Router {
    Router::new()
        .route("/*name", get(serve_object))
        .fallback(not_found_root)
}

/// Requests to `/` itself name no object.
async fn not_found_root() -> ServerResult<Response> {
    Err(ErrorKind::NotFound(String::new()).into())
}

/// Serves one object, GET or HEAD.
#[instrument(skip_all, fields(name = %raw))]
#[axum_macros::debug_handler]
async fn serve_object(
    Extension(state): Extension<Arc<State>>,
    method: Method,
    Path(raw): Path<String>,
) -> ServerResult<Response> {
    let name = match clean_object_name(&raw) {
        Some(name) => name,
        None => return Err(ErrorKind::NotFound(raw).into()),
    };

    let backend = state.storage();
    let stat = backend.stat(&name).await.ok();
    let head = method == Method::HEAD;

    if name == NIX_CACHE_INFO_NAME {
        let bytes = read_object(&**backend, &name).await?;
        return Ok(fixed_response(
            mime::NIX_CACHE_INFO,
            bytes,
            stat.as_ref(),
            head,
        ));
    }

    if name.ends_with(".narinfo") {
        let bytes = read_object(&**backend, &name).await?;

        // An object that is present but does not parse is served as
        // missing; parse diagnostics stay out of responses.
        let mut info =
            NarInfo::decode_bytes(&bytes).map_err(|_| ErrorKind::NotFound(name.clone()))?;

        match state.resigner().apply(&mut info) {
            Ok(ResignOutcome::Resigned) => tracing::debug!("rewrote signature set"),
            Ok(ResignOutcome::Unchanged) => tracing::debug!("no policy clause matched"),
            Err(err) => {
                tracing::warn!(error = %err, "resigning failed");
                return Err(ErrorKind::Signing(name).into());
            }
        }

        let bytes = info.encode().into_bytes();
        return Ok(fixed_response(mime::NARINFO, bytes, stat.as_ref(), head));
    }

    // Pass-through: exact stored bytes, no content-type of our own.
    if head {
        let stat = match stat {
            Some(stat) => stat,
            None => return Err(ErrorKind::NotFound(name).into()),
        };
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, stat.size);
        if let Some(mtime) = stat.mtime {
            builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(mtime));
        }
        return Ok(builder.body(body::boxed(body::Empty::new())).unwrap());
    }

    let download = backend
        .open(&name)
        .await
        .map_err(|err| storage_error(&name, err))?;
    let Download::AsyncRead(reader) = download;

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(stat) = &stat {
        builder = builder.header(header::CONTENT_LENGTH, stat.size);
        if let Some(mtime) = stat.mtime {
            builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(mtime));
        }
    }
    Ok(builder
        .body(body::boxed(StreamBody::new(ReaderStream::new(reader))))
        .unwrap())
}

/// A fully-buffered response whose length reflects the (possibly
/// rewritten) body, with the stored object's mtime when known.
fn fixed_response(
    content_type: &str,
    bytes: Vec<u8>,
    stat: Option<&ObjectStat>,
    head: bool,
) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, bytes.len());
    if let Some(mtime) = stat.and_then(|s| s.mtime) {
        builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(mtime));
    }
    if head {
        builder.body(body::boxed(body::Empty::new())).unwrap()
    } else {
        builder.body(body::boxed(body::Full::from(bytes))).unwrap()
    }
}

async fn read_object(backend: &dyn StorageBackend, name: &str) -> ServerResult<Vec<u8>> {
    let download = backend
        .open(name)
        .await
        .map_err(|err| storage_error(name, err))?;
    download
        .into_bytes()
        .await
        .map_err(|err| storage_error(name, err))
}

/// A missing object is a 404; anything else from the backend is internal.
fn storage_error(name: &str, err: common::storage::StorageError) -> ServerError {
    if err.is_not_found() {
        ErrorKind::NotFound(name.to_string()).into()
    } else {
        ServerError::internal(err)
    }
}

/// Normalizes a request path into an object name under the cache root.
///
/// Empty and `.` segments collapse; `..` pops. A path that climbs out of
/// the root, or names nothing, resolves to `None`.
pub fn clean_object_name(raw: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}


#[cfg(test)]
mod gateway_tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;

    use common::{NamedPrivateKey, NarInfo};

    use crate::config::Config;
    use crate::State;

    const BASE_MANIFEST: &str = "StorePath: /nix/store/58br4vk3q5akf4g8lx0pqzfhn47k3j8d-bash-5.2p37
URL: nar/1ncdraq4baqrdp773pmrpb6b3pngkym9278z1kg3qkxxj25s3mrw.nar.xz
Compression: xz
FileHash: sha256:1ncdraq4baqrdp773pmrpb6b3pngkym9278z1kg3qkxxj25s3mrw
FileSize: 445184
NarHash: sha256:07pyb1bl3q4ivh86vx6vjjivfsm1hqrwdfm5d2x8kk7qzysl5j4j
NarSize: 1654408
References: 58br4vk3q5akf4g8lx0pqzfhn47k3j8d-bash-5.2p37 rmy663w9p7xb202rcln4jjzmvivznmz8-glibc-2.40-66
Deriver: cfp8jh04f3jfdcjskw2p64ri3w6njndm-bash-5.2p37.drv
";

    struct Fixture {
        app: Router,
        _dir: tempfile::TempDir,
        stored: String,
        signer: NamedPrivateKey,
    }

    /// A cache directory holding one manifest signed by `cacheA`, a
    /// nix-cache-info document, and one opaque blob, served with the
    /// given policy.
    async fn fixture(policy_verify: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let cache_a = NamedPrivateKey::generate("cacheA").unwrap();
        let cache_b = NamedPrivateKey::generate("cacheB").unwrap();
        let signer = NamedPrivateKey::generate("mySigner").unwrap();

        let mut info = NarInfo::decode(BASE_MANIFEST).unwrap();
        info.sign(&cache_a).unwrap();
        let stored = info.encode();
        std::fs::write(dir.path().join("foo.narinfo"), &stored).unwrap();
        std::fs::write(
            dir.path().join("nix-cache-info"),
            "StoreDir: /nix/store\nWantMassQuery: 1\nPriority: 40\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nar")).unwrap();
        std::fs::write(dir.path().join("nar/blob.bin"), b"\x00\x01\x02binary").unwrap();

        let mut config: Config = toml::from_str(&format!(
            "[storage]\ntype = \"local\"\npath = \"{}\"\n",
            dir.path().display()
        ))
        .unwrap();
        config
            .keys
            .public_keys
            .push(cache_a.public_key().to_string());
        config
            .keys
            .public_keys
            .push(cache_b.public_key().to_string());
        config.keys.private_keys.push(signer.to_string());
        config.policy.push(common::PolicyRule {
            verify: policy_verify.to_string(),
            sign: "mySigner".to_string(),
        });

        let state = State::new(&config).await.unwrap();
        Fixture {
            app: crate::api::router().layer(axum::extract::Extension(Arc::clone(&state))),
            _dir: dir,
            stored,
            signer,
        }
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn head(path: &str) -> Request<Body> {
        Request::builder()
            .method("HEAD")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_policy_match_appends_signature() {
        let fixture = fixture("cacheA").await;

        let response = fixture.app.clone().oneshot(get("/foo.narinfo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/x-nix-narinfo"
        );

        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.starts_with(&fixture.stored));

        let info = NarInfo::decode(&body).unwrap();
        assert_eq!(info.sigs.len(), 2);
        assert_eq!(info.sigs[1].key_name(), "mySigner");
        let (verified, _) = info.verify(&fixture.signer.public_key());
        assert!(verified);
    }

    #[tokio::test]
    async fn test_policy_no_match_returns_stored_bytes() {
        let fixture = fixture("cacheB").await;

        let response = fixture.app.clone().oneshot(get("/foo.narinfo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_bytes(response).await;
        assert_eq!(body, fixture.stored.as_bytes());
    }

    #[tokio::test]
    async fn test_head_narinfo_reports_rewritten_length() {
        let fixture = fixture("cacheA").await;

        let full = fixture.app.clone().oneshot(get("/foo.narinfo")).await.unwrap();
        let expected_length = full.headers()[header::CONTENT_LENGTH].clone();
        let expected_body = body_bytes(full).await;

        let response = fixture
            .app
            .clone()
            .oneshot(head("/foo.narinfo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], expected_length);
        assert_eq!(
            expected_length.to_str().unwrap(),
            expected_body.len().to_string()
        );
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let fixture = fixture("cacheA").await;

        let response = fixture
            .app
            .clone()
            .oneshot(get("/does-not-exist"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_bytes(response).await,
            b"Not Found: does-not-exist"
        );
    }

    #[tokio::test]
    async fn test_pass_through_is_byte_exact() {
        let fixture = fixture("cacheA").await;

        let response = fixture
            .app
            .clone()
            .oneshot(get("/nar/blob.bin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert_eq!(body_bytes(response).await, b"\x00\x01\x02binary");
    }

    #[tokio::test]
    async fn test_head_get_parity() {
        let fixture = fixture("cacheA").await;

        for path in ["/foo.narinfo", "/nar/blob.bin", "/nix-cache-info"] {
            let get_response = fixture.app.clone().oneshot(get(path)).await.unwrap();
            let head_response = fixture.app.clone().oneshot(head(path)).await.unwrap();

            assert_eq!(get_response.status(), head_response.status(), "{path}");
            assert_eq!(
                get_response.headers().get(header::CONTENT_LENGTH),
                head_response.headers().get(header::CONTENT_LENGTH),
                "{path}"
            );
            assert!(body_bytes(head_response).await.is_empty(), "{path}");
        }
    }

    #[tokio::test]
    async fn test_nix_cache_info_content_type() {
        let fixture = fixture("cacheA").await;

        let response = fixture
            .app
            .clone()
            .oneshot(get("/nix-cache-info"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/x-nix-cache-info"
        );
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.starts_with("StoreDir: /nix/store"));
    }

    #[tokio::test]
    async fn test_unparseable_manifest_is_served_as_missing() {
        let fixture = fixture("cacheA").await;
        std::fs::write(fixture._dir.path().join("bad.narinfo"), "no colon here\n").unwrap();

        let response = fixture.app.clone().oneshot(get("/bad.narinfo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_path_escape_is_not_found() {
        let fixture = fixture("cacheA").await;

        let response = fixture
            .app
            .clone()
            .oneshot(get("/a/../../etc/passwd"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

mod support;

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::ACCEPT;
use mocktraffic_rs::modules::{
    Blacklist, EventDispatcher, IdentityPool, JitterPolicy, RequestOrchestrator,
    ResourceDiscovery, SharedTargets, StatsReporter, TargetSet,
};
use mocktraffic_rs::{DispatchOutcome, RequestKind};
use support::{ScriptedTransport, fast_timing};
use tokio::time::sleep;

fn orchestrator(
    transport: Arc<ScriptedTransport>,
    blacklist: &[&str],
    max_resources: usize,
) -> (Arc<RequestOrchestrator>, StatsReporter) {
    let events = Arc::new(EventDispatcher::new());
    let blacklist = Arc::new(Blacklist::new(blacklist.iter().copied()));
    let targets = SharedTargets::new(TargetSet::load(["https://site.test/"], &blacklist));
    let stats = StatsReporter::new(events.clone());
    let orchestrator = Arc::new(RequestOrchestrator::new(
        Arc::new(IdentityPool::new(["UA1"])),
        targets,
        ResourceDiscovery::new(max_resources, blacklist),
        JitterPolicy::new(fast_timing()),
        stats.clone(),
        events,
    ));
    orchestrator.bind_transport(transport);
    (orchestrator, stats)
}

#[tokio::test]
async fn page_with_twenty_images_schedules_three_fetches() {
    let page: String = (0..20)
        .map(|i| format!("<img src=\"/img/{i}.png\">"))
        .collect();
    let transport = Arc::new(ScriptedTransport::new().route("/", 200, page));
    let (orchestrator, stats) = orchestrator(transport.clone(), &[], 3);

    let outcome = orchestrator.execute("https://site.test/", RequestKind::Primary).await;
    assert_eq!(outcome, DispatchOutcome::Succeeded { status: 200 });
    sleep(Duration::from_millis(100)).await;

    let images: Vec<String> = transport
        .seen_paths()
        .into_iter()
        .filter(|path| path.starts_with("/img/"))
        .collect();
    assert_eq!(images.len(), 3);
    assert_eq!(stats.request_count(), 4);
}

#[tokio::test]
async fn css_imports_are_followed_one_level_only() {
    let page = r#"<link rel="stylesheet" href="/css/main.css"><img src="/ads/banner.png">"#;
    let transport = Arc::new(
        ScriptedTransport::new()
            .route("/", 200, page)
            .route("/css/main.css", 200, "@import \"nested.css\";")
            .route("/css/nested.css", 200, "@import url(deeper.css);"),
    );
    let (orchestrator, _) = orchestrator(transport.clone(), &["/ads/"], 5);

    orchestrator.dispatch("https://site.test/", RequestKind::Primary);
    sleep(Duration::from_millis(150)).await;

    let paths = transport.seen_paths();
    assert!(paths.contains(&"/css/main.css".to_string()));
    assert!(paths.contains(&"/css/nested.css".to_string()));
    assert!(!paths.contains(&"/css/deeper.css".to_string()));
    assert!(!paths.iter().any(|path| path.starts_with("/ads/")));
}

#[tokio::test]
async fn stylesheet_links_without_css_extension_are_scanned() {
    let page = r#"<link rel="stylesheet" href="/fonts/css2?family=Roboto">"#;
    let transport = Arc::new(
        ScriptedTransport::new()
            .route("/", 200, page)
            .route("/fonts/css2", 200, "@import \"/fonts/imported.css\";"),
    );
    let (orchestrator, _) = orchestrator(transport.clone(), &[], 5);

    orchestrator.dispatch("https://site.test/", RequestKind::Primary);
    sleep(Duration::from_millis(150)).await;

    let seen = transport.seen();
    let sheet = seen
        .iter()
        .find(|request| request.url.path() == "/fonts/css2")
        .expect("stylesheet fetched");
    assert!(
        sheet.headers[ACCEPT]
            .to_str()
            .unwrap()
            .starts_with("text/css")
    );
    assert!(sheet.capture_body);
    assert!(transport.seen_paths().contains(&"/fonts/imported.css".to_string()));
}

#[tokio::test]
async fn css_content_type_marks_unknown_resources_as_stylesheets() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .route("/bundle", 200, "@import \"print.css\";")
            .content_type("/bundle", "text/css; charset=utf-8"),
    );
    let (orchestrator, _) = orchestrator(transport.clone(), &[], 5);

    orchestrator
        .execute("https://site.test/bundle", RequestKind::Resource)
        .await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        transport.seen_paths(),
        vec!["/bundle".to_string(), "/print.css".to_string()]
    );
}

#[tokio::test]
async fn failed_primary_discovers_nothing() {
    let page = r#"<img src="/img/a.png">"#;
    let transport = Arc::new(ScriptedTransport::new().route("/", 500, page));
    let (orchestrator, stats) = orchestrator(transport.clone(), &[], 3);

    orchestrator.execute("https://site.test/", RequestKind::Primary).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.seen_paths(), vec!["/".to_string()]);
    assert_eq!(stats.request_count(), 0);
}

#[tokio::test]
async fn auxiliary_requests_are_posts() {
    let transport = Arc::new(ScriptedTransport::new());
    let (orchestrator, stats) = orchestrator(transport.clone(), &[], 3);

    orchestrator
        .execute("https://site.test/contact", RequestKind::FormSubmit)
        .await;
    orchestrator
        .execute("https://www.google-analytics.com/collect", RequestKind::Beacon)
        .await;

    let seen = transport.seen();
    assert!(seen.iter().all(|request| request.method == Method::POST));
    assert!(seen.iter().all(|request| !request.capture_body));
    assert_eq!(stats.request_count(), 2);
}

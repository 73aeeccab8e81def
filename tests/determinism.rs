use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use smol_assembler::{Assembler, BuildConfig, ComponentRegistry, Data, PagePlan, SearchRoot};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A small site: a styled card with a slot, a plain-script counter with
/// public data, and a page template using both several times.
fn fixture() -> TempDir {
    let site = TempDir::new().expect("Failed to create site dir");
    let components = site.path().join("component");

    let card = components.join("x-card");
    std::fs::create_dir_all(&card).unwrap();
    std::fs::write(
        card.join("component.toml"),
        "template = \"template.html\"\nstyle = \"style.css\"\n[props.tone]\ndefault = \"gray\"\n",
    )
    .unwrap();
    std::fs::write(
        card.join("template.html"),
        "<article class=\"{{ tone }}\"><slot static>Empty</slot></article>",
    )
    .unwrap();
    std::fs::write(
        card.join("style.css"),
        "x-card {\n  border: 1px solid $tone;\n}\n@media (min-width: 600px) {\n  x-card .title { padding: 4px; }\n}\n",
    )
    .unwrap();

    let counter = components.join("x-counter");
    std::fs::create_dir_all(&counter).unwrap();
    std::fs::write(
        counter.join("component.toml"),
        "script = \"script.js\"\npublic_data = [\"count\"]\n",
    )
    .unwrap();
    std::fs::write(counter.join("script.js"), "window.count = publicData.count").unwrap();

    std::fs::write(
        site.path().join("page.html"),
        concat!(
            "<html><head><title>{{ title }}</title></head><body>",
            "<x-card tone=\"red\">One</x-card>",
            "<x-card>Two</x-card>",
            "<x-card tone=\"red\">Three</x-card>",
            "<x-counter></x-counter>",
            "</body></html>",
        ),
    )
    .unwrap();
    site
}

fn assembler(site: &Path, out: &Path) -> Assembler {
    let registry =
        ComponentRegistry::discover(vec![SearchRoot::new(site.join("component"), site.join("node_modules"))])
            .unwrap();
    Assembler::new(
        Arc::new(registry),
        BuildConfig {
            out_dir: out.to_path_buf(),
            ..Default::default()
        },
    )
}

fn plan(site: &Path, route: &str) -> PagePlan {
    PagePlan {
        template: site.join("page.html"),
        route: route.to_string(),
        data: json!({"title": "Home", "count": 5})
            .as_object()
            .cloned()
            .unwrap(),
    }
}

async fn build_hashes(site: &Path, route: &str) -> Vec<String> {
    let out = TempDir::new().unwrap();
    let output = assembler(site, out.path())
        .build_page(&plan(site, route))
        .await
        .unwrap();
    let mut files = vec![output.html_path.clone()];
    files.extend(output.style_path.clone());
    files.extend(output.script_path.clone());
    files
        .iter()
        .map(|path| sha256(&std::fs::read(path).unwrap()))
        .collect()
}

// ============================================================================
// Byte identity
// ============================================================================

#[tokio::test]
async fn deterministic_build_identical_bytes() {
    let site = fixture();
    let first = build_hashes(site.path(), "index").await;
    let second = build_hashes(site.path(), "index").await;
    assert_eq!(first.len(), 3, "expected html, css and js artifacts");
    assert_eq!(first, second, "Builds must produce identical bytes");
}

#[tokio::test]
async fn deterministic_in_memory_assembly() {
    let site = fixture();
    let out = TempDir::new().unwrap();
    let assembler = assembler(site.path(), out.path());
    let markup = std::fs::read_to_string(site.path().join("page.html")).unwrap();
    let data: Data = json!({"count": 5}).as_object().cloned().unwrap();

    let a = assembler.assemble(&markup, &data, "blog/post").await.unwrap();
    let b = assembler.assemble(&markup, &data, "blog/post").await.unwrap();
    assert_eq!(sha256(a.html.as_bytes()), sha256(b.html.as_bytes()));
    assert_eq!(a.css, b.css);
    assert_eq!(a.js, b.js);
}

#[tokio::test]
async fn separate_pages_do_not_share_state() {
    let site = fixture();
    let out = TempDir::new().unwrap();
    let assembler = assembler(site.path(), out.path());
    let markup = std::fs::read_to_string(site.path().join("page.html")).unwrap();

    // A page assembled after another one matches a page assembled alone.
    let alone = assembler.assemble(&markup, &Data::new(), "about").await.unwrap();
    let _other = assembler.assemble(&markup, &Data::new(), "index").await.unwrap();
    let again = assembler.assemble(&markup, &Data::new(), "about").await.unwrap();
    assert_eq!(alone.html, again.html);
    assert_eq!(alone.css, again.css);
}

//! Page assembly.
//!
//! This module orchestrates one page build:
//! 1. Compile the page template with the page data
//! 2. Expand every component instance, in registry discovery order, until a
//!    pass finds nothing left to expand
//! 3. Aggregate page style, page script, shared tags and public data
//! 4. Inject the references into the markup and write the artifacts
//!
//! Everything is computed in memory first. A page that fails leaves nothing
//! on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collab::{
    LightningStyle, MarkupCompiler, PassthroughBundler, ScriptBuild, ScriptBundler, StyleCompiler,
    StyleOptions, TeraMarkup,
};
use crate::config::BuildConfig;
use crate::context::PageBuildContext;
use crate::data::resolve_instance_data;
use crate::extract::{
    contains_tag, custom_element_names, find_instances, TagOccurrence, INSTANCE_ATTR_PREFIX,
};
use crate::registry::{ComponentDefinition, ComponentRegistry};
use crate::scope::{display_rule, scope_attr};
use crate::slot::{apply_static_slots, collect_blocks, unwrap_root};
use crate::utils::{self, BODY_CLOSE, HEAD_CLOSE};
use crate::weave::{compute_public_data, runtime_tag, Weaver, MOUNT_RUNNER};
use crate::{diagnostic_text, AssembleError, Data, Diagnostic};

/// Expansion passes allowed before a page is considered runaway.
pub const MAX_EXPANSION_ROUNDS: usize = 32;

// ---------------------------------------------------------------------------
// Plans and results
// ---------------------------------------------------------------------------

/// One page to build.
#[derive(Debug, Clone)]
pub struct PagePlan {
    /// Page template source file.
    pub template: PathBuf,
    /// Route relative to the public directory, without extension (`blog/post`).
    pub route: String,
    pub data: Data,
}

/// A fully assembled page, not yet written.
#[derive(Debug, Clone)]
pub struct AssembledPage {
    pub route: String,
    pub html: String,
    /// Page style sheet, when any component type was used.
    pub css: Option<String>,
    /// Page script bundle, when any component contributed script.
    pub js: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Where a built page was written.
#[derive(Debug, Clone)]
pub struct PageOutput {
    pub route: String,
    pub html_path: PathBuf,
    pub style_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of a multi-page build.
#[derive(Debug, Default)]
pub struct SiteReport {
    pub pages: Vec<PageOutput>,
    /// One [`AssembleError::Page`] per failed page.
    pub failures: Vec<AssembleError>,
}

impl SiteReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Assembles pages against a shared component registry.
pub struct Assembler {
    registry: Arc<ComponentRegistry>,
    markup: Arc<dyn MarkupCompiler>,
    style: Arc<dyn StyleCompiler>,
    scripts: Arc<dyn ScriptBundler>,
    config: BuildConfig,
}

// Mutable state of one page while its instances are expanded.
struct PageRun<'a> {
    page_data: &'a Data,
    html: String,
    ctx: PageBuildContext,
    unresolved: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
    instances: usize,
}

impl Assembler {
    /// An assembler with the default collaborators.
    pub fn new(registry: Arc<ComponentRegistry>, config: BuildConfig) -> Self {
        Self {
            registry,
            markup: Arc::new(TeraMarkup),
            style: Arc::new(LightningStyle),
            scripts: Arc::new(PassthroughBundler),
            config,
        }
    }

    pub fn with_markup_compiler(mut self, markup: Arc<dyn MarkupCompiler>) -> Self {
        self.markup = markup;
        self
    }

    pub fn with_style_compiler(mut self, style: Arc<dyn StyleCompiler>) -> Self {
        self.style = style;
        self
    }

    pub fn with_script_bundler(mut self, scripts: Arc<dyn ScriptBundler>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    fn weaver(&self) -> Weaver<'_> {
        Weaver {
            bundler: self.scripts.as_ref(),
            config: &self.config,
        }
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    pub fn html_path(&self, route: &str) -> PathBuf {
        self.config.public_dir().join(format!("{route}.html"))
    }

    pub fn style_path(&self, route: &str) -> PathBuf {
        self.config
            .public_dir()
            .join(&self.config.page_style_path)
            .join(format!("{route}.css"))
    }

    pub fn script_path(&self, route: &str) -> PathBuf {
        self.config
            .public_dir()
            .join(&self.config.page_script_path)
            .join(format!("{route}.js"))
    }

    pub fn style_href(&self, route: &str) -> String {
        format!("/{}/{route}.css", self.config.page_style_path.trim_matches('/'))
    }

    pub fn script_href(&self, route: &str) -> String {
        format!("/{}/{route}.js", self.config.page_script_path.trim_matches('/'))
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    /// Compile, assemble and write one page.
    ///
    /// Errors carry the page route.
    pub async fn build_page(&self, plan: &PagePlan) -> Result<PageOutput, AssembleError> {
        self.build_page_inner(plan)
            .await
            .map_err(|err| err.for_page(&plan.route))
    }

    async fn build_page_inner(&self, plan: &PagePlan) -> Result<PageOutput, AssembleError> {
        let source = tokio::fs::read_to_string(&plan.template).await?;
        let markup = self
            .markup
            .compile(&source, &self.config.template_base, &plan.data)
            .await
            .map_err(|err| AssembleError::Markup {
                path: plan.template.clone(),
                message: diagnostic_text(&err),
            })?;
        let page = self.assemble(&markup, &plan.data, &plan.route).await?;
        self.write_page(page).await
    }

    /// Assemble a compiled page in memory.
    pub async fn assemble(
        &self,
        markup: &str,
        page_data: &Data,
        route: &str,
    ) -> Result<AssembledPage, AssembleError> {
        let route = match utils::normalize_route(route) {
            r if r.is_empty() => "index".to_string(),
            r => r,
        };
        tracing::info!("assembling page {}", route);

        let mut run = PageRun {
            page_data,
            html: markup.to_string(),
            ctx: PageBuildContext::new(utils::stable_seed(&route)),
            unresolved: HashSet::new(),
            diagnostics: vec![Diagnostic::info(format!("Assembly started for page: {route}"))],
            instances: 0,
        };

        let mut settled = false;
        for _ in 0..MAX_EXPANSION_ROUNDS {
            let mut expanded = 0;
            for name in self.registry.names() {
                expanded += self.expand_type(name, &mut run).await?;
            }
            if expanded == 0 {
                settled = true;
                break;
            }
            run.instances += expanded;
        }
        if !settled {
            return Err(AssembleError::ExpansionDepth(MAX_EXPANSION_ROUNDS));
        }
        self.check_unknown_tags(&mut run)?;

        let css = self.page_style(&run.ctx)?;
        let js = self.page_script(&run.ctx, &route).await?;
        let html = self.inject(run.html, &run.ctx, &route, css.is_some(), js.is_some());

        run.diagnostics.push(Diagnostic::info(format!(
            "Assembly complete: {} instances, {} bytes CSS, {} bytes JS",
            run.instances,
            css.as_ref().map_or(0, |c| c.len()),
            js.as_ref().map_or(0, |j| j.len()),
        )));
        tracing::info!("assembled page {} ({} instances)", route, run.instances);

        Ok(AssembledPage {
            route,
            html,
            css,
            js,
            diagnostics: run.diagnostics,
        })
    }

    /// Write an assembled page's artifacts.
    pub async fn write_page(&self, page: AssembledPage) -> Result<PageOutput, AssembleError> {
        let AssembledPage {
            route,
            html,
            css,
            js,
            mut diagnostics,
        } = page;

        let mut written = Vec::new();
        let paths = self.write_artifacts(&route, &html, css, js, &mut written).await;
        let (html_path, style_path, script_path) = match paths {
            Ok(paths) => paths,
            Err(err) => {
                // Remove what already landed so the page is not left half-written.
                for path in &written {
                    if let Err(cleanup) = tokio::fs::remove_file(path).await {
                        tracing::warn!("could not remove {}: {}", path.display(), cleanup);
                    }
                }
                return Err(err);
            }
        };

        diagnostics.push(Diagnostic::info(format!("Written to {}", html_path.display())));

        Ok(PageOutput {
            route,
            html_path,
            style_path,
            script_path,
            diagnostics,
        })
    }

    async fn write_artifacts(
        &self,
        route: &str,
        html: &str,
        css: Option<String>,
        js: Option<String>,
        written: &mut Vec<PathBuf>,
    ) -> Result<(PathBuf, Option<PathBuf>, Option<PathBuf>), AssembleError> {
        let style_path = match css {
            Some(css) => {
                let path = self.style_path(route);
                write_file(&path, &css).await?;
                written.push(path.clone());
                Some(path)
            }
            None => None,
        };
        let script_path = match js {
            Some(js) => {
                let path = self.script_path(route);
                write_file(&path, &js).await?;
                written.push(path.clone());
                Some(path)
            }
            None => None,
        };
        let html_path = self.html_path(route);
        write_file(&html_path, html).await?;
        Ok((html_path, style_path, script_path))
    }

    // -----------------------------------------------------------------------
    // Expansion
    // -----------------------------------------------------------------------

    // Custom elements with no registry entry are left in place.
    fn check_unknown_tags(&self, run: &mut PageRun<'_>) -> Result<(), AssembleError> {
        let known = self.registry.names();
        for name in custom_element_names(&run.html) {
            if known.contains(&name) || run.unresolved.contains(&name) {
                continue;
            }
            if self.config.strict_components {
                return Err(AssembleError::UnresolvedComponent(name));
            }
            tracing::warn!("no component named <{}>, leaving tags as-is", name);
            run.diagnostics.push(Diagnostic::warning(
                format!("Component <{name}> could not be resolved"),
                Some("no component directory in any search root".to_string()),
            ));
            run.unresolved.insert(name);
        }
        Ok(())
    }

    // Expands the not yet processed instances of one type. Returns how many.
    async fn expand_type(&self, name: &str, run: &mut PageRun<'_>) -> Result<usize, AssembleError> {
        if run.unresolved.contains(name) || !contains_tag(&run.html, name) {
            return Ok(0);
        }
        let pending: Vec<TagOccurrence> = find_instances(&run.html, name)?
            .into_iter()
            .filter(|tag| !tag.is_processed())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let Some(component) = self.registry.resolve(name).await? else {
            if self.config.strict_components {
                return Err(AssembleError::UnresolvedComponent(name.to_string()));
            }
            tracing::warn!("component <{}> did not resolve, leaving tags as-is", name);
            run.diagnostics.push(Diagnostic::warning(
                format!("Component <{name}> could not be resolved"),
                Some(format!("{} tags left unexpanded", pending.len())),
            ));
            run.unresolved.insert(name.to_string());
            return Ok(0);
        };
        tracing::debug!("expanding {} <{}> instances", pending.len(), name);

        if run.ctx.finished_types.insert(name.to_string()) {
            self.once_per_type(&component, run).await?;
        }

        let template = match component.template_path() {
            Some(path) if !component.is_framework_backed() => {
                Some((tokio::fs::read_to_string(&path).await?, path))
            }
            _ => None,
        };
        let style = match component.style_path() {
            Some(path) => Some((tokio::fs::read_to_string(&path).await?, path)),
            None => None,
        };

        let mut rewrites = Vec::with_capacity(pending.len());
        for tag in &pending {
            let data = resolve_instance_data(&component, run.page_data, tag).await?;
            let id = run.ctx.ids.issue()?;
            let inner = tag.inner(&run.html);

            let (root_attrs, body) = match &template {
                Some((source, path)) => self.expand_template(source, path, &data, inner).await?,
                None => (String::new(), inner.to_string()),
            };

            let label = match &style {
                Some((source, path)) => {
                    let options = StyleOptions {
                        compress: true,
                        filename: path.clone(),
                        search_paths: self.config.style_include_paths.clone(),
                        bindings: Default::default(),
                    }
                    .bind_data(&data);
                    let css = self.style.compile(source, &options).await.map_err(|err| {
                        AssembleError::Style {
                            component: component.name.clone(),
                            message: diagnostic_text(&err),
                        }
                    })?;
                    let styles = run.ctx.styles.entry(name.to_string()).or_default();
                    Some(styles.record(css, &mut run.ctx.labels)?)
                }
                None => None,
            };

            if component.is_framework_backed() {
                let script = self.weaver().mount_script(&component, &id, inner).await?;
                run.ctx.scripts.push(script);
                run.ctx.mounts += 1;
            }

            rewrites.push(render_instance(
                name,
                tag.attr_text(&run.html),
                &id,
                label.as_deref(),
                &root_attrs,
                &body,
            ));
        }
        run.ctx.styles.entry(name.to_string()).or_default();

        let mut html = String::with_capacity(run.html.len());
        let mut pos = 0;
        for (tag, rewrite) in pending.iter().zip(&rewrites) {
            html.push_str(&run.html[pos..tag.start]);
            html.push_str(rewrite);
            pos = tag.end();
        }
        html.push_str(&run.html[pos..]);
        run.html = html;

        Ok(pending.len())
    }

    // Shared tags, the type script or framework runtime, and public data.
    async fn once_per_type(
        &self,
        component: &ComponentDefinition,
        run: &mut PageRun<'_>,
    ) -> Result<(), AssembleError> {
        let mode = self.config.mode;
        run.ctx
            .shared_tags
            .extend(component.tags.iter().filter(|tag| tag.applies_to(mode)).cloned());

        if component.is_framework_backed() {
            run.ctx.shared_tags.push(runtime_tag(&self.config));
        } else if component.has_script() {
            let script = self.weaver().type_script(component).await?;
            run.ctx.scripts.push(script);
        }

        if let Some(entry) = compute_public_data(component, run.page_data).await? {
            run.ctx.public_data.push(entry);
        }
        Ok(())
    }

    // Compile the template, resolve static slots, then unwrap a single root.
    async fn expand_template(
        &self,
        source: &str,
        path: &Path,
        data: &Data,
        inner: &str,
    ) -> Result<(String, String), AssembleError> {
        let base = path.parent().unwrap_or(path);
        let expanded = self
            .markup
            .compile(source, base, data)
            .await
            .map_err(|err| AssembleError::Markup {
                path: path.to_path_buf(),
                message: diagnostic_text(&err),
            })?;
        let resolved = apply_static_slots(&expanded, &collect_blocks(inner));
        Ok(unwrap_root(&resolved).unwrap_or((String::new(), resolved)))
    }

    // -----------------------------------------------------------------------
    // Aggregation
    // -----------------------------------------------------------------------

    fn page_style(&self, ctx: &PageBuildContext) -> Result<Option<String>, AssembleError> {
        let mut css = String::new();
        for name in self.registry.names() {
            if let Some(styles) = ctx.styles.get(name) {
                css.push_str(&display_rule(name));
                css.push_str(&styles.scoped_rules(name)?.concat());
            }
        }
        Ok((!css.is_empty()).then_some(css))
    }

    async fn page_script(
        &self,
        ctx: &PageBuildContext,
        route: &str,
    ) -> Result<Option<String>, AssembleError> {
        if ctx.scripts.iter().all(|script| script.is_empty()) {
            return Ok(None);
        }
        let mut text = ctx.scripts.concat();
        if ctx.mounts > 0 {
            text.push_str(MOUNT_RUNNER);
        }
        let request = ScriptBuild::text(text, self.config.mode);
        let script = self
            .scripts
            .build(request)
            .await
            .map_err(|err| AssembleError::Script {
                context: format!("page {route}"),
                message: diagnostic_text(&err),
            })?;
        Ok(Some(script))
    }

    fn inject(
        &self,
        html: String,
        ctx: &PageBuildContext,
        route: &str,
        has_style: bool,
        has_script: bool,
    ) -> String {
        let mut html = html;
        if let Some(public_data) = ctx.public_data_script() {
            html = utils::inject_before(&html, BODY_CLOSE, &public_data);
        }
        if has_style {
            let link = format!(r#"<link rel="stylesheet" href="{}">"#, self.style_href(route));
            html = utils::inject_before(&html, HEAD_CLOSE, &link);
        }
        let (head_tags, body_tags) = ctx.rendered_tags();
        html = utils::inject_before(&html, HEAD_CLOSE, &head_tags.concat());
        html = utils::inject_before(&html, BODY_CLOSE, &body_tags.concat());
        if has_script {
            let tag = format!(r#"<script src="{}"></script>"#, self.script_href(route));
            html = utils::inject_before(&html, BODY_CLOSE, &tag);
        }
        html
    }
}

/// Rewrite one instance: scope and id attributes first, then the original
/// attributes, then the template root's attributes.
fn render_instance(
    name: &str,
    attr_text: &str,
    id: &str,
    label: Option<&str>,
    root_attrs: &str,
    body: &str,
) -> String {
    let scope = label.map(|l| format!(" {}", scope_attr(l))).unwrap_or_default();
    format!("<{name}{scope} {INSTANCE_ATTR_PREFIX}{id}{attr_text}{root_attrs}>{body}</{name}>")
}

async fn write_file(path: &Path, contents: &str) -> Result<(), AssembleError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Build pages one after another. A failed page is reported and skipped.
pub async fn build_pages(assembler: &Assembler, plans: &[PagePlan]) -> SiteReport {
    let mut report = SiteReport::default();
    for plan in plans {
        match assembler.build_page(plan).await {
            Ok(output) => report.pages.push(output),
            Err(err) => {
                tracing::warn!("{}", err);
                report.failures.push(err);
            }
        }
    }
    tracing::info!(
        "built {} pages, {} failed",
        report.pages.len(),
        report.failures.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SearchRoot;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn assembler(root: &Path, out: &Path) -> Assembler {
        let registry = ComponentRegistry::discover(vec![SearchRoot::new(root, "node_modules")]).unwrap();
        Assembler::new(
            Arc::new(registry),
            BuildConfig {
                out_dir: out.to_path_buf(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn instance_rewrite_order() {
        assert_eq!(
            render_instance("x-card", r#" title="t""#, "id000001", Some("lab00001"), r#" class="card""#, "<p>x</p>"),
            r#"<x-card data-smol-lab00001 data-smol-id-id000001 title="t" class="card"><p>x</p></x-card>"#
        );
        assert_eq!(
            render_instance("x-card", "", "id000001", None, "", ""),
            "<x-card data-smol-id-id000001></x-card>"
        );
    }

    #[test]
    fn artifact_paths() {
        let assembler = assembler(Path::new("components"), Path::new("out"));
        assert_eq!(assembler.html_path("blog/post"), PathBuf::from("out/public/blog/post.html"));
        assert_eq!(
            assembler.style_path("blog/post"),
            PathBuf::from("out/public/style/page/blog/post.css")
        );
        assert_eq!(
            assembler.script_path("index"),
            PathBuf::from("out/public/script/page/index.js")
        );
        assert_eq!(assembler.style_href("blog/post"), "/style/page/blog/post.css");
        assert_eq!(assembler.script_href("index"), "/script/page/index.js");
    }

    #[tokio::test]
    async fn page_without_components_is_untouched() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let assembler = assembler(root.path(), out.path());
        let html = "<html><head></head><body><p>plain</p></body></html>";
        let page = assembler.assemble(html, &Data::new(), "index").await.unwrap();
        assert_eq!(page.html, html);
        assert!(page.css.is_none());
        assert!(page.js.is_none());
    }

    #[tokio::test]
    async fn empty_route_is_index() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let assembler = assembler(root.path(), out.path());
        let page = assembler.assemble("", &Data::new(), "/").await.unwrap();
        assert_eq!(page.route, "index");
    }

    #[tokio::test]
    async fn template_root_merges_into_instance() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let dir = root.path().join("x-card");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("component.toml"), "template = \"template.html\"").unwrap();
        std::fs::write(
            dir.join("template.html"),
            "<div class=\"card\"><h2>{{ title }}</h2><slot static>Empty</slot></div>",
        )
        .unwrap();
        let assembler = assembler(root.path(), out.path());

        let page = assembler
            .assemble(r#"<x-card title="Hi">Body</x-card>"#, &Data::new(), "index")
            .await
            .unwrap();
        assert!(page.html.starts_with("<x-card data-smol-id-"), "{}", page.html);
        assert!(
            page.html.ends_with(r#" title="Hi" class="card"><h2>Hi</h2>Body</x-card>"#),
            "{}",
            page.html
        );
        assert_eq!(page.css.as_deref(), Some("x-card{display:block}"));
    }

    #[tokio::test]
    async fn failed_html_write_removes_written_artifacts() {
        let out = TempDir::new().unwrap();
        let assembler = assembler(Path::new("components"), out.path());
        // A directory where the HTML file belongs makes the last write fail.
        std::fs::create_dir_all(assembler.html_path("index")).unwrap();

        let page = AssembledPage {
            route: "index".into(),
            html: "<html></html>".into(),
            css: Some("x{display:block}".into()),
            js: Some("run()".into()),
            diagnostics: Vec::new(),
        };
        let err = assembler.write_page(page).await.unwrap_err();
        assert!(matches!(err, AssembleError::IoError(_)), "{err}");
        assert!(!assembler.style_path("index").exists());
        assert!(!assembler.script_path("index").exists());
    }
}

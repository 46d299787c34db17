//! Full artifact post-processing pipeline over generated bundles.

use pretty_assertions::assert_eq;

use kiln::artifact::passes::EXTERNAL_QUERY;
use kiln::artifact::{
    import_map, ArtifactBundle, ArtifactMode, ArtifactPass, DependencyDedupe, LiteralUnescape, PostProcessError,
    PostProcessor,
};

const CHART_COMPONENT: &str = r#"import { LineChart, Line } from "recharts";
import * Icons from "lucide-react";

export default function Chart() {
  const label = `Total: \${total} \"units\"`;
  return React.createElement(LineChart, { width: 400, height: 300 }, label);
}"#;

fn processed(code: &str, mode: ArtifactMode) -> ArtifactBundle {
    let mut bundle = ArtifactBundle::from_generated(code, mode, "Chart");
    PostProcessor::new().run(&mut bundle);
    bundle
}

fn imports(bundle: &ArtifactBundle) -> std::collections::BTreeMap<String, String> {
    import_map::read(&bundle.transformed_code)
        .unwrap()
        .expect("bundle has an import map")
        .imports
}

#[test]
fn react_bundle_is_wired_normalized_and_unescaped() {
    let bundle = processed(CHART_COMPONENT, ArtifactMode::React);
    let map = imports(&bundle);
    let doc = &bundle.transformed_code;

    assert_eq!(map["recharts"], format!("https://esm.sh/recharts@2.12.7{EXTERNAL_QUERY}"));
    assert_eq!(map["lucide-react"], format!("https://esm.sh/lucide-react@0.424.0{EXTERNAL_QUERY}"));
    assert_eq!(map["react"], "https://esm.sh/react@18.3.1");
    assert_eq!(map["react-dom"], "https://esm.sh/react-dom@18.3.1");
    assert!(doc.contains("import * as Icons from \"lucide-react\""));
    assert!(doc.contains(r#"`Total: ${total} "units"`"#), "{doc}");
    assert!(doc.contains("script-src 'self' 'unsafe-inline' https://esm.sh data:"));
    assert!(bundle.detected_dependencies.contains("recharts"));
    assert!(bundle.warnings.is_empty(), "{:?}", bundle.warnings);
}

#[test]
fn running_the_pipeline_twice_changes_nothing() {
    let once = processed(CHART_COMPONENT, ArtifactMode::React);
    let mut twice = once.clone();

    PostProcessor::new().run(&mut twice);

    assert_eq!(twice.transformed_code, once.transformed_code);
    assert_eq!(
        twice.transformed_code.matches(EXTERNAL_QUERY).count(),
        once.transformed_code.matches(EXTERNAL_QUERY).count()
    );
}

#[test]
fn html_documents_keep_scoped_paths_and_existing_queries() {
    let html = r#"<!DOCTYPE html>
<html>
<head>
<script type="importmap">{"imports": {"@tanstack/react-query": "https://esm.sh/@tanstack/react-query@5.51.1"}}</script>
</head>
<body>
<script type="module">
import useSWRInfinite from "https://esm.sh/swr@2.2.5/infinite";
import { create } from "https://esm.sh/zustand@4?bundle";
</script>
</body>
</html>"#;

    let bundle = processed(html, ArtifactMode::Html);
    let map = imports(&bundle);
    let doc = &bundle.transformed_code;

    assert_eq!(
        map["@tanstack/react-query"],
        format!("https://esm.sh/@tanstack/react-query@5.51.1{EXTERNAL_QUERY}")
    );
    assert_eq!(map["react"], "https://esm.sh/react@18.3.1");
    assert!(doc.contains(&format!("\"https://esm.sh/swr@2.2.5/infinite{EXTERNAL_QUERY}\"")));
    assert!(doc.contains("\"https://esm.sh/zustand@4?bundle\""));
}

#[test]
fn a_malformed_import_map_is_reported_and_later_passes_still_run() {
    let html = r#"<!DOCTYPE html>
<html><head>
<script type="importmap">{"imports": {"recharts": "https://esm.sh/recharts@2"},}</script>
</head><body>
<script type="module">
import { LineChart } from "recharts";
import * Icons from "lucide-react";
</script>
</body></html>"#;

    let bundle = processed(html, ArtifactMode::Html);

    assert_eq!(bundle.warnings.len(), 2, "{:?}", bundle.warnings);
    assert!(bundle.warnings[0].starts_with("dependency_injection:"));
    assert!(bundle.warnings[1].starts_with("dependency_dedupe:"));
    assert!(bundle.transformed_code.contains("import * as Icons from \"lucide-react\""));
    assert!(bundle.transformed_code.contains(r#""recharts": "https://esm.sh/recharts@2"},}"#));
}

#[test]
fn unescaping_before_dedupe_would_corrupt_the_import_map() {
    let html = "<!DOCTYPE html><html><head>\n<script type=\"importmap\">{\"imports\": {\"recharts\": \"https://esm.sh/recharts@2.12.7\", \"note\": \"`hi \\\"there\\\"`\"}}</script>\n</head><body></body></html>";
    let source = ArtifactBundle::from_document(html);

    let mut wrong_order = source.clone();
    LiteralUnescape.apply(&mut wrong_order).unwrap();
    assert!(matches!(
        DependencyDedupe.apply(&mut wrong_order),
        Err(PostProcessError::ImportMap(_))
    ));

    let mut right_order = source;
    DependencyDedupe.apply(&mut right_order).unwrap();
    LiteralUnescape.apply(&mut right_order).unwrap();
    let map = imports(&right_order);
    assert_eq!(map["recharts"], format!("https://esm.sh/recharts@2.12.7{EXTERNAL_QUERY}"));
    assert_eq!(map["note"], r#"`hi "there"`"#);
}

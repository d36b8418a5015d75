use malarkup::{Config, DiagnosticKind, Host, Library, Map, Markup, Passage, Store, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
struct RecordingHost {
    variables: Rc<RefCell<Vec<(String, String)>>>,
    snippets: Rc<RefCell<Vec<(String, String)>>>,
}

impl Host for RecordingHost {
    fn update_variable(&self, path: &str, text: &str) {
        self.variables.borrow_mut().push((path.to_owned(), text.to_owned()));
    }

    fn replace_snippet(&self, id: &str, html: &str) {
        self.snippets.borrow_mut().push((id.to_owned(), html.to_owned()));
    }
}

fn engine(library: Library, host: RecordingHost) -> Markup {
    Markup::builder(Store::new())
        .registry(library)
        .host(host)
        .config(Config {
            markdown: false,
            ..Config::default()
        })
        .build()
}

fn snippet(name: &str, source: &str) -> Passage {
    Passage::new(name, source).with_tags(["snippet"])
}

#[test]
fn link_shapes() {
    let markup = engine(Library::new(), RecordingHost::default());
    assert_eq!(
        markup.parse("[[A]]"),
        r#"<button data-tw-link data-destination="A">A</button>"#
    );
    assert_eq!(
        markup.parse("[[A|B]]"),
        r#"<button data-tw-link data-destination="A">B</button>"#
    );
    assert_eq!(
        markup.parse(r#"[[A][say("hi")]]"#),
        r#"<button data-tw-link data-destination="A" data-onclick="say('hi')">A</button>"#
    );
    assert_eq!(
        markup.parse("[[A|B][f()]]"),
        r#"<button data-tw-link data-destination="A" data-onclick="f()">B</button>"#
    );
    assert_eq!(
        markup.parse("[[Go north->North]]"),
        r#"<button data-tw-link data-destination="North">Go north</button>"#
    );
}

#[test]
fn counter_display_updates_through_the_host() {
    let host = RecordingHost::default();
    let markup = engine(Library::new(), host.clone());
    let html = markup.parse("@counter(0)Count: @counter");
    assert_eq!(
        html,
        r#"Count: <tw-var data-var="counter" data-signal="counter">0</tw-var>"#
    );
    assert!(host.variables.borrow().is_empty());

    markup.store().set_path("counter", 5);
    assert_eq!(
        host.variables.borrow().as_slice(),
        [("counter".to_owned(), "5".to_owned())]
    );
}

#[test]
fn display_before_assignment_is_blank() {
    let markup = engine(Library::new(), RecordingHost::default());
    let html = markup.parse("[@later] @later(1)");
    assert_eq!(
        html,
        r#"[<tw-var data-var="later" data-signal="later"></tw-var>] "#
    );
    assert!(
        markup
            .diagnostics()
            .iter()
            .any(|diagnostic| diagnostic.kind == DiagnosticKind::UnresolvedVariable)
    );
}

#[test]
fn reassignment_reuses_the_signal() {
    let markup = engine(Library::new(), RecordingHost::default());
    markup.parse("@x(1)");
    let first = markup.store().signal("x").unwrap();
    markup.parse("@x(2)");
    let second = markup.store().signal("x").unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.peek(), Value::from(2));
}

#[test]
fn derived_variables_follow_their_inputs() {
    let markup = engine(Library::new(), RecordingHost::default());
    markup.parse("@x(3)@!y(x * 2)");
    assert_eq!(markup.store().get_path("y"), Value::from(6));
    markup.store().set_path("x", 10);
    assert_eq!(markup.store().get_path("y"), Value::from(20));
}

#[test]
fn one_variable_effect_per_path_per_render() {
    let host = RecordingHost::default();
    let markup = engine(Library::new(), host.clone());
    let rendered = markup.parse_rendered("@hp(3)@hp / @hp / @hp");
    assert_eq!(rendered.effects.len(), 1);
    markup.store().set_path("hp", 2);
    assert_eq!(host.variables.borrow().len(), 1);

    rendered.dispose();
    markup.store().set_path("hp", 1);
    assert_eq!(host.variables.borrow().len(), 1);
}

#[test]
fn snippet_attributes_bind_the_slot() {
    let library = Library::new().with(snippet("greet", "{{ content }}"));
    let markup = engine(library, RecordingHost::default());
    let html = markup.parse(r#"<% greet name="Ada" %>Hello, @name!<%/greet%>"#);
    assert!(html.starts_with(r#"<tw-snippet data-snippet-id=""#), "{html}");
    assert!(html.ends_with(r#"">Hello, Ada!</tw-snippet>"#), "{html}");
    assert!(markup.diagnostics().is_empty(), "{:?}", markup.diagnostics());
}

#[test]
fn expression_attributes_are_evaluated_at_parse_time() {
    let library =
        Library::new().with(snippet("badge", "<b>{{ label }}: {{ value + 1 }}</b>"));
    let markup = engine(library, RecordingHost::default());
    markup.store().set_path("score", 41);
    let html = markup.parse(r#"<% badge label='Score' value={score} /%>"#);
    assert!(html.contains("<b>Score: 42</b>"), "{html}");
}

#[test]
fn nested_snippets_resolve_transitively() {
    let library = Library::new()
        .with(snippet("outer", "[<% inner who={who} /%>]"))
        .with(snippet("inner", "hi {{ who }}"));
    let markup = engine(library, RecordingHost::default());
    let html = markup.parse(r#"<% outer who="Bo" /%>"#);
    assert_eq!(html.matches("<tw-snippet").count(), 2);
    assert!(html.contains("hi Bo"), "{html}");
}

#[test]
fn paired_tags_of_the_same_name_nest() {
    let library = Library::new().with(snippet("box", "({{ content }})"));
    let markup = engine(library, RecordingHost::default());
    let html = markup.parse("<% box %>a<% box %>b<%/box%>c<%/box%>");
    assert_eq!(html.matches("<tw-snippet").count(), 2);
    let text: String = html
        .split('<')
        .filter_map(|part| part.split_once('>').map(|(_, text)| text))
        .collect();
    assert_eq!(text, "(a(b)c)");
}

#[test]
fn self_referencing_snippet_stops_at_the_depth_limit() {
    let library = Library::new().with(snippet("echo", "x<% echo /%>"));
    let markup = Markup::builder(Store::new())
        .registry(library)
        .config(Config {
            max_snippet_depth: 4,
            markdown: false,
            trace_tokens: false,
        })
        .build();
    let html = markup.parse("<% echo /%>");
    assert_eq!(html.matches("<tw-snippet").count(), 4);
    assert_eq!(html.matches('x').count(), 4);
    let depth_limits = markup
        .diagnostics()
        .iter()
        .filter(|diagnostic| diagnostic.kind == DiagnosticKind::DepthLimit)
        .count();
    assert_eq!(depth_limits, 1);
}

#[test]
fn raw_snippets_are_not_tokenized() {
    let library = Library::new()
        .with(Passage::new("code", "@not_a_var [[nor a link]]").with_tags(["snippet", "raw"]));
    let markup = engine(library, RecordingHost::default());
    let html = markup.parse("<% code /%>");
    assert!(html.contains(">@not_a_var [[nor a link]]</tw-snippet>"), "{html}");
}

#[test]
fn snippets_rerender_when_a_reactive_expression_input_changes() {
    let host = RecordingHost::default();
    let library = Library::new().with(snippet("status", "HP {{ @hp }}"));
    let markup = engine(library, host.clone());
    let html = markup.parse("@hp(10)<% status /%>");
    assert!(html.contains(">HP 10</tw-snippet>"), "{html}");
    assert!(host.snippets.borrow().is_empty());

    markup.store().set_path("hp", 7);
    let snippets = host.snippets.borrow();
    assert_eq!(snippets.len(), 1);
    assert_eq!(snippets[0].1, "HP 7");
    assert!(html.contains(&snippets[0].0));
}

#[test]
fn snippet_entry_point_uses_the_given_context() {
    let markup = engine(Library::new(), RecordingHost::default());
    let mut context = Map::new();
    context.insert("name".into(), Value::from("Ada"));
    assert_eq!(markup.snippet("Hi {{ name }} &amp; @name", &context), "Hi Ada & Ada");
}

#[test]
fn render_passage_picks_the_pipeline_by_tag() {
    let markup = engine(Library::new(), RecordingHost::default());
    let story = Passage::new("Start", "$n(2){{ $n }}");
    assert_eq!(markup.render_passage(&story), "2");
    let fragment = snippet("frag", "{{ 1 + 1 }}");
    assert_eq!(markup.render_passage(&fragment), "2");
}

#[test]
fn display_before_assignment_stays_live() {
    let host = RecordingHost::default();
    let markup = engine(Library::new(), host.clone());
    let html = markup.parse("Before: @counter. @counter(0)After: @counter");
    assert_eq!(
        html,
        concat!(
            r#"Before: <tw-var data-var="counter" data-signal="counter"></tw-var>. "#,
            r#"After: <tw-var data-var="counter" data-signal="counter">0</tw-var>"#,
        )
    );
    assert!(host.variables.borrow().is_empty());

    markup.store().set_path("counter", 5);
    assert_eq!(
        host.variables.borrow().as_slice(),
        [("counter".to_owned(), "5".to_owned())]
    );
}

#[test]
fn assignments_inside_host_expressions_leave_nothing() {
    let markup = engine(Library::new(), RecordingHost::default());
    assert_eq!(markup.parse("{% @x(1) %}ok"), "ok");
    assert_eq!(markup.parse("{{ @y(2) }}ok"), "ok");
    assert_eq!(markup.store().get_path("x"), Value::from(1));
    assert_eq!(markup.store().get_path("y"), Value::from(2));
    assert!(markup.diagnostics().is_empty(), "{:?}", markup.diagnostics());
}

#[test]
fn escaped_template_openers_are_not_evaluated() {
    let markup = engine(Library::new(), RecordingHost::default());
    assert_eq!(markup.parse(r"\{{ 1 + 1 }}"), "&#123;{ 1 + 1 }}");
    assert_eq!(markup.parse(r"\{% if x %}"), "&#123;% if x %}");
    assert_eq!(markup.parse(r"\{{ 1 }} {{ 1 + 1 }}"), "&#123;{ 1 }} 2");
    assert!(markup.diagnostics().is_empty(), "{:?}", markup.diagnostics());
}

#[test]
fn snippet_bodies_are_unescaped_once() {
    let library = Library::new().with(snippet("show", "&amp;amp;lt;"));
    let markup = engine(library, RecordingHost::default());
    assert_eq!(markup.parse("&amp;amp;lt;"), "&amp;lt;");
    let html = markup.parse("<% show /%>");
    assert!(html.ends_with(r#"">&amp;lt;</tw-snippet>"#), "{html}");
}

#[test]
fn each_watcher_runs_once_per_write() {
    let host = RecordingHost::default();
    let library = Library::new().with(snippet("status", "HP {{ @hp }} / {{ @hp }}"));
    let markup = engine(library, host.clone());
    let rendered = markup.parse_rendered("@hp(10)@hp <% status /%>");
    assert_eq!(rendered.effects.len(), 2);
    assert_eq!(markup.store().signal("hp").map(|hp| hp.subscriber_count()), Some(2));

    markup.store().set_path("hp", 7);
    assert_eq!(host.variables.borrow().len(), 1);
    assert_eq!(host.snippets.borrow().len(), 1);
    assert_eq!(host.snippets.borrow()[0].1, "HP 7 / 7");

    markup.store().set_path("hp", 6);
    assert_eq!(host.variables.borrow().len(), 2);
    assert_eq!(host.snippets.borrow().len(), 2);
}

#[test]
fn snippet_watchers_do_not_rerender_up_front() {
    let library = Library::new().with(snippet("status", "{{ @hp }}{{ @missing }}"));
    let markup = engine(library, RecordingHost::default());
    markup.parse("@hp(1)<% status /%>");
    let unresolved = markup
        .diagnostics()
        .iter()
        .filter(|diagnostic| diagnostic.kind == DiagnosticKind::UnresolvedVariable)
        .count();
    assert_eq!(unresolved, 1);
}

#[test]
fn malformed_paths_are_reported() {
    let markup = engine(Library::new(), RecordingHost::default());
    let html = markup.parse("@bag.1st and $bag.2nd(3)");
    assert_eq!(html, r#"<tw-var data-var="bag.1st"></tw-var> and "#);
    let kinds: Vec<DiagnosticKind> = markup
        .diagnostics()
        .iter()
        .map(|diagnostic| diagnostic.kind)
        .collect();
    assert_eq!(kinds, [DiagnosticKind::InvalidPath, DiagnosticKind::InvalidPath]);
    assert_eq!(markup.store().get_path("bag"), Value::Undefined);
}

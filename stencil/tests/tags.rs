mod common;

use common::{person, render, render_or_error, setup};
use indoc::indoc;
use stencil::{Context, Engine, Renderer, Result, ScanError, TagError, TagHandler, TemplateError};

fn check(cases: &[(&str, &str)], ctx: impl Fn() -> Context) {
    for (source, expected) in cases {
        let actual = render_or_error(source, ctx());
        assert_eq!(&actual, expected, "rendering {source:?}");
    }
}

#[test]
fn malformed_tags() {
    setup();
    check(
        &[
            ("{% if test %}", "error: no closing tag found, expected one of: else, endif"),
            ("{%if%}", "error: `if` tag: missing condition"),
            ("{% endif %}", "error: unhandled placeholder `endif`"),
        ],
        Context::new,
    );

    let err = render("{% %}", Context::new()).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"`test` line 1, column 4: empty tag");
    let err = render("{% while x %}", Context::new()).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"`test` line 1, column 12: unknown tag `while`");
}

#[test]
fn if_with_booleans() {
    setup();
    check(
        &[
            ("{%if true%}Yes{% else %}No{%endif%}", "Yes"),
            ("{% if !true %}Yes{% else %}No{%endif%}", "No"),
            ("{% if false %}Yes{% else %}No{%endif%}", "No"),
            ("{% if !false %}Yes{% else %}No{%endif%}", "Yes"),
            ("{% if false %}Yes{%endif%}", ""),
            (
                "{% if true && true && true && true && !false && !false %}Yes{% else %}No{%endif%}",
                "Yes",
            ),
            (
                "{% if !true || !true || !true || true && false %}Yes{% else %}No{%endif%}",
                "No",
            ),
            (
                "{% if !true || !true || !true || true && true %}Yes{% else %}No{%endif%}",
                "Yes",
            ),
            ("{% if false || false || true || false %}Yes{% else %}No{%endif%}", "Yes"),
        ],
        Context::new,
    );
}

#[test]
fn if_with_other_values() {
    setup();
    check(
        &[
            (r#"{% if "" %}Yes{% else %}No{%endif%}"#, "No"),
            (r#"{% if "with content" %}Yes{% else %}No{%endif%}"#, "Yes"),
            ("{% if 0 %}Yes{% else %}No{%endif%}", "No"),
            ("{% if zero %}Yes{% else %}No{%endif%}", "No"),
            ("{% if 919592 %}Yes{% else %}No{%endif%}", "Yes"),
            ("{% if 0.0 %}Yes{% else %}No{%endif%}", "No"),
            ("{% if missing %}Yes{% else %}No{%endif%}", "No"),
            ("{% if 5 && 10 %}Yes{%else%}No{%endif%}", "No"),
        ],
        || Context::new().with("zero", 0),
    );
}

#[test]
fn if_comparisons() {
    setup();
    check(
        &[
            (
                "{% if person.Age > 0 %}{% if person.Age > 50 %}yes{% if person.Age > 60 %}no{% else %}yes{% endif %}{% else %}no2{% endif %}{% else %}no1{% endif %}",
                "no2",
            ),
            ("{% if person.Age > 0 && person.Age >= 40 %}yes{%else%}no{% endif %}", "yes"),
            ("{% if person.Age > 0 && person.Age > 40 %}yes{%else%}no{% endif %}", "no"),
            (
                "{% if person.Age > 0 && person.Age >= 40 && person.Age < 41 %}yes{%else%}no{% endif %}",
                "yes",
            ),
            (
                "{% if false %}{% if person.Age > 50 %}yes{% if person.Age > 60 %}no{% else %}yes{% endif %}{% else %}no2{% endif %}{% else %}no1{% endif %}",
                "no1",
            ),
            ("{% if person.Name == \"Florian\" %}yes{% endif %}", "yes"),
            ("{% if person.Name <> \"Florian\" %}yes{% else %}no{% endif %}", "no"),
            ("{% if person.Age == 40.0 %}yes{% endif %}", "yes"),
            (
                r#"{% if "Flo==ri&&an"|lower == "flo==ri&&an" %}yes{%else%}no{%endif%}"#,
                "yes",
            ),
            (r#"{% if name|lower == "flo==ri&&an" %}yes{%else%}no{%endif%}"#, "yes"),
            (r#"{% if name == "flo==ri&&an" %}yes{%else%}no{%endif%}"#, "yes"),
        ],
        || {
            Context::new()
                .with("person", person())
                .with("name", "flo==ri&&an")
        },
    );
}

#[test]
fn for_loop_state() {
    setup();
    check(
        &[
            ("{% for 6 %}{{ forloop.Counter }}{% endfor %}", "012345"),
            ("{% for 6 %}{{ forcounter }}{% endfor %}", "012345"),
            ("{% for 6 %}{{ forloop.Counter1 }}{% endfor %}", "123456"),
            ("{% for 6 %}{{ forcounter1 }}{% endfor %}", "123456"),
            ("{% for 6 %}{{ forloop.Max }}{% endfor %}", "555555"),
            ("{% for 6 %}{{ forloop.Max1 }}{% endfor %}", "666666"),
            (
                "{% for 6 %}{{ forloop.First }}{% endfor %}",
                "truefalsefalsefalsefalsefalse",
            ),
            (
                "{% for 6 %}{{ forloop.Last }}{% endfor %}",
                "falsefalsefalsefalsefalsetrue",
            ),
        ],
        Context::new,
    );
}

#[test]
fn for_loop_sources() {
    setup();
    check(
        &[
            ("{% for 0 %}Yes{% else %}No{% endfor %}", "No"),
            ("{% for negative %}Yes{% else %}No{% endfor %}", "No"),
            ("{% for nothing|length %}Yes{% else %}No{% endfor %}", "No"),
            ("{% for name|length %}{{ name.forcounter }}{% endfor %}", "Florian"),
            ("{% for char in name %}{{ char }}{% endfor %}", "Florian"),
            (
                "{% for word in words %}{{ word|capitalize }}{% if !forloop.Last %} {%endif %}{% endfor %}",
                "Hi Florian",
            ),
            (
                "{% for word in dict %}{{ word.Key }} means {{ word.Value }}{% endfor %}",
                "salut means hello",
            ),
            (
                "{% for friend in person.Friends %}{{ friend.Name }}{% if !forloop.Last %}, {% endif %}{% endfor %}",
                "Georg, Mike, Philipp",
            ),
            ("{% for x in missing %}Yes{% else %}empty{% endfor %}", "empty"),
        ],
        || {
            Context::new()
                .with("name", "Florian")
                .with("negative", -3)
                .with("words", vec!["hi", "florian"])
                .with(
                    "dict",
                    std::collections::BTreeMap::from([("salut", "hello")]),
                )
                .with("person", person())
        },
    );
}

#[test]
fn for_loop_type_errors() {
    setup();
    check(
        &[
            (
                r#"{% for "abc" %}x{% endfor %}"#,
                "error: `for` tag: `\"abc\"` is string, a loop without `in` needs an integer",
            ),
            (
                "{% for x in 5 %}x{% endfor %}",
                "error: `for` tag: cannot iterate over int",
            ),
        ],
        Context::new,
    );
}

#[test]
fn nested_loops() {
    setup();
    check(
        &[
            (
                "{% for 3 %}{{ forloop.Counter1 }}{%for 6%}{{ forloop.Counter1 }}{% endfor %}{% endfor %}",
                "112345621234563123456",
            ),
            (
                "{% for 3 %}{%for 6%}{{ forloops.0.Counter1 }}{{ forloops.1.Counter1 }}{% endfor %}{% endfor %}",
                "111213141516212223242526313233343536",
            ),
            (
                "{% for word in words %}{% for char in word %}{{ forloops.0.Counter }}{{ forloops.1.Counter }}{{ char }}{% endfor %}{% endfor %}",
                "00H01e02l03l04o10F11l12o",
            ),
            (
                "{% for 2 %}{% for 1 %}{% endfor %}{{ forloops.0.Counter }}{{ forloop.Counter }}{% endfor %}",
                "01",
            ),
        ],
        || Context::new().with("words", vec!["Hello", "Flo"]),
    );

    let out = render_or_error(
        "{% for 3 %}{%for 6%}{% for 4 %}{{ forloops.0.Counter1 }}{{ forloops.1.Counter1 }}{{forloops.2.Counter1 }} {% endfor %}{% endfor %}{% endfor %}",
        Context::new(),
    );
    let groups: Vec<_> = out.split_whitespace().collect();
    assert_eq!(groups.len(), 3 * 6 * 4);
    assert_eq!(groups.first(), Some(&"111"));
    assert_eq!(groups[5], "122");
    assert_eq!(groups.last(), Some(&"364"));
}

#[test]
fn loop_bindings_are_scoped() {
    setup();
    check(
        &[
            (
                "{% for x in items %}{{ x }}{% endfor %}[{{ x }}]{{ forloop.Counter }}{{ forcounter }}",
                "ab[]",
            ),
            (
                "{% for item in items %}{{ item }}{% endfor %}-{{ item }}",
                "ab-outer",
            ),
        ],
        || {
            Context::new()
                .with("items", vec!["a", "b"])
                .with("item", "outer")
        },
    );
}

#[test]
fn skipped_nested_loops() {
    setup();
    let zero_outer = indoc! {"
        {% trim %}{% for 0 %}
            {% for 10 %}
                {% for 100 %}
                    {% for 1000 %}
                        yes
                    {% else %}
                        else1000
                    {% endfor %}
                {% else %}
                    else100
                {% endfor %}
            {% else %}
                else10
            {% endfor %}
        {% else %}else0{% endfor %}{% endtrim %}"};
    assert_eq!(render_or_error(zero_outer, Context::new()), "else0");

    assert_eq!(
        render_or_error(
            "{% trim %}{% for 3 %}{% for 0 %}{% for 100 %}{% for 1000 %}yes{% else %}else1000{% endfor %}{% else %}else100{% endfor %}{% else %}else10{% endfor %}{% else %}else0{% endfor %}{% endtrim %}",
            Context::new(),
        ),
        "else10else10else10"
    );

    let innermost_empty = indoc! {"
        {% remove %}{% for 1 %}
            {% for 2 %}
                {% for 3 %}
                    {% for 0 %}
                        yes
                    {% else %}
                        else1000
                    {% endfor %}
                {% else %}
                    else100
                {% endfor %}
            {% else %}
                else10
            {% endfor %}
        {% else %}
            else0
        {% endfor %}{% endremove %}"};
    assert_eq!(
        render_or_error(innermost_empty, Context::new()),
        "else1000".repeat(6)
    );
}

#[test]
fn trim() {
    setup();
    check(
        &[
            ("{% trim %}\t          hello     \t \t{% endtrim %}", "hello"),
            (
                "{% trim %}\t  {% if true %}\t          hello     \t{% endif %}   \t \t{% endtrim %}",
                "hello",
            ),
            (
                "{% trim %}\t  {% if false %}\t          hello     \t{% endif %}   \t \t{% endtrim %}",
                "",
            ),
            (
                "{% trim %}\t  {% if false %}\t          hello{% endtrim %}     \t{% endif %}   \t \t",
                "error: no closing tag found, expected one of: endtrim",
            ),
            (
                "{% trim %}\t  {% if true %}\t          hello{% endtrim %}     \t{% endif %}   \t \t",
                "error: unhandled placeholder `endtrim`",
            ),
        ],
        Context::new,
    );
}

#[test]
fn remove() {
    setup();
    check(
        &[
            ("{% remove \" \",\"\t\" %}\t          hello     \t \t{% endremove %}", "hello"),
            (
                "{% remove \"hello\",\" \",\"\t\" %}\t  {% if true %}\t          hello     \t{% endif %}   \t \t{% endremove %}",
                "",
            ),
            (
                "{% remove %}\t  {% if false %}\t          hello    \t\t{%else%}   yes \t{% endif %}   \t \t{% endremove %}",
                "yes",
            ),
            (
                "{% remove pattern, \"-\" %}a-b-c{% endremove %}",
                "ac",
            ),
        ],
        || Context::new().with("pattern", "b"),
    );
}

#[test]
fn custom_tags() {
    setup();

    struct Repeat;

    impl TagHandler for Repeat {
        fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
            let times: usize = args
                .trim()
                .parse()
                .map_err(|_| TagError::new("repeat", format!("`{args}` is not a count")))?;
            let (_, body) = r.execute_until(&["endrepeat"], ctx)?;
            Ok(body.repeat(times))
        }

        fn ignore(&self, _args: &str, r: &mut Renderer<'_>) -> Result<()> {
            r.ignore_until(&["endrepeat"]).map(|_| ())
        }
    }

    let engine = Engine::builder()
        .tag("repeat", Repeat)
        .terminator("endrepeat")
        .build();
    let template = engine
        .parse(
            "custom",
            "{% repeat 3 %}{{ x }}{% endrepeat %}|{% if false %}{% repeat 2 %}no{% endrepeat %}{% endif %}",
        )
        .unwrap();
    let mut ctx = Context::new().with("x", "ab");
    assert_eq!(template.render(&mut ctx).unwrap(), "ababab|");

    let err = engine
        .parse("custom", "{% repeat 2 %}unterminated")
        .unwrap()
        .render(&mut Context::new())
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        TemplateError::Scan(ScanError { expected }) if expected == &["endrepeat"]
    ));
}

#[test]
fn render_errors_carry_position() {
    setup();
    let err = render("line one\n  {% if x %}{{ 5|upper }}{% endif %}", Context::new().with("x", true))
        .unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"error in `test` at line 2, column 3 (if x)");
    let TemplateError::Render(outer) = &err else {
        panic!("expected a render error");
    };
    insta::assert_snapshot!(outer.source.to_string(), @"error in `test` at line 2, column 13 (5|upper)");
    insta::assert_snapshot!(err.root_cause().to_string(), @"filter `upper` failed");
}

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::NotificationError;

/// Rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl Template {
    #[must_use]
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Template renderer using `{{variable}}` placeholders.
///
/// Placeholders without a value are left as-is.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    templates: HashMap<String, Template>,
}

impl TemplateRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renderer preloaded with the reminder templates.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut renderer = Self::new();
        for template in default_templates() {
            renderer.register(template);
        }
        renderer
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    #[must_use]
    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    pub fn render(
        &self,
        template_id: &str,
        data: &Map<String, Value>,
    ) -> Result<RenderedContent, NotificationError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| NotificationError::TemplateNotFound(template_id.to_string()))?;

        Ok(RenderedContent {
            subject: render_string(&template.subject, data),
            body: render_string(&template.body, data),
        })
    }
}

/// Substitutes every `{{var}}`. Variables missing from `data` render empty.
fn render_string(template: &str, data: &Map<String, Value>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        result.push_str(&rest[..start]);
        let key = rest[start + 2..start + 2 + len].trim();
        match data.get(key) {
            Some(Value::String(s)) => result.push_str(s),
            Some(Value::Number(n)) => result.push_str(&n.to_string()),
            Some(Value::Bool(b)) => result.push_str(&b.to_string()),
            Some(Value::Null) | None => {}
            Some(other) => result.push_str(&other.to_string()),
        }
        rest = &rest[start + 2 + len + 2..];
    }

    result.push_str(rest);
    result
}

fn default_templates() -> Vec<Template> {
    vec![
        Template::new(
            "appointment_reminder",
            "Upcoming appointment",
            "Hello {{first_name}}, this is a reminder of your appointment on {{due_at}}.",
        ),
        Template::new(
            "follow_up_reminder",
            "Follow-up visit due",
            "Hello {{first_name}}, your follow-up visit is due on {{due_at}}.",
        ),
        Template::new(
            "payment_due_reminder",
            "Payment due",
            "Hello {{first_name}}, invoice {{reference_id}} is due on {{due_at}}.",
        ),
        Template::new(
            "medication_refill_reminder",
            "Medication refill",
            "Hello {{first_name}}, prescription {{reference_id}} is due for a refill \
             on {{due_at}}.",
        ),
        Template::new(
            "lab_test_reminder",
            "Lab test scheduled",
            "Hello {{first_name}}, your lab test is scheduled for {{due_at}}.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_render_template() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new(
            "test",
            "Hello {{name}}",
            "Your appointment is on {{date}}",
        ));

        let result = renderer
            .render("test", &data(json!({"name": "Ana", "date": "2026-01-15"})))
            .unwrap();
        assert_eq!(result.subject, "Hello Ana");
        assert_eq!(result.body, "Your appointment is on 2026-01-15");
    }

    #[test]
    fn test_render_with_numbers_and_missing() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new("test", "", "{{count}} messages for {{who}}"));

        let result = renderer.render("test", &data(json!({"count": 5}))).unwrap();
        assert_eq!(result.body, "5 messages for ");
    }

    #[test]
    fn test_defaults_never_leak_placeholders() {
        let renderer = TemplateRenderer::with_defaults();
        let only_name = data(json!({"first_name": "Ana"}));

        let result = renderer.render("appointment_reminder", &only_name).unwrap();
        assert_eq!(
            result.body,
            "Hello Ana, this is a reminder of your appointment on ."
        );

        for id in [
            "follow_up_reminder",
            "payment_due_reminder",
            "medication_refill_reminder",
            "lab_test_reminder",
        ] {
            let result = renderer.render(id, &Map::new()).unwrap();
            assert!(!result.subject.contains("{{"), "{id}");
            assert!(!result.body.contains("{{"), "{id}");
        }
    }

    #[test]
    fn test_unterminated_braces_kept_verbatim() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new("t", "", "{{ name }} owes {{amount"));

        let result = renderer.render("t", &data(json!({"name": "Ana"}))).unwrap();
        assert_eq!(result.body, "Ana owes {{amount");
    }

    #[test]
    fn test_template_not_found() {
        let result = TemplateRenderer::new().render("nonexistent", &Map::new());
        assert!(matches!(result, Err(NotificationError::TemplateNotFound(_))));
    }

    #[test]
    fn test_defaults_registered() {
        let renderer = TemplateRenderer::with_defaults();
        for id in [
            "appointment_reminder",
            "follow_up_reminder",
            "payment_due_reminder",
            "medication_refill_reminder",
            "lab_test_reminder",
        ] {
            assert!(renderer.get(id).is_some(), "{id}");
        }
    }
}

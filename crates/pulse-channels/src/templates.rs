//! Handlebars templates for the HTML email body.

use serde::Serialize;

use pulse_types::{PulseError, Result};

pub const EMAIL_BODY: &str = "email-body";

const EMAIL_BODY_TEMPLATE: &str = r#"<div class="pulse" style="font-family: Lato, Helvetica, Arial, sans-serif; color: #4c5773;">
  <h1 class="pulse-title" style="font-size: 22px; font-weight: 700;">{{title}}</h1>
  {{#if sent_by}}<p class="pulse-sender" style="color: #949aab;">Sent by {{sent_by}}</p>{{/if}}
  {{#each cards}}
  <div class="card" style="margin: 24px 0;">
    <h2 class="card-title" style="font-size: 16px;">{{#if link}}<a href="{{link}}" target="_blank" rel="noopener" style="color: #509ee3; text-decoration: none;">{{title}}</a>{{else}}{{title}}{{/if}}</h2>
    {{#each notes}}<p class="card-note" style="color: #949aab; font-size: 12px;">{{this}}</p>
    {{/each}}
    {{#if image_cid}}<img class="card-image" src="cid:{{image_cid}}" alt="{{title}}" style="max-width: 100%;">{{/if}}
    {{#if text}}<p class="card-text">{{text}}</p>{{/if}}
  </div>
  {{/each}}
</div>"#;

#[derive(Debug, Clone, Serialize)]
pub struct EmailBody {
    pub title: String,
    pub sent_by: Option<String>,
    pub cards: Vec<CardBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardBlock {
    pub title: String,
    pub link: Option<String>,
    pub image_cid: Option<String>,
    pub text: Option<String>,
    pub notes: Vec<String>,
}

pub struct EmailTemplates {
    registry: handlebars::Handlebars<'static>,
}

impl EmailTemplates {
    pub fn new() -> Result<Self> {
        let mut registry = handlebars::Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(EMAIL_BODY, EMAIL_BODY_TEMPLATE)
            .map_err(|e| PulseError::Config(format!("registering {EMAIL_BODY} template: {e}")))?;
        Ok(Self { registry })
    }

    pub fn render_body(&self, body: &EmailBody) -> Result<String> {
        self.registry
            .render(EMAIL_BODY, body)
            .map_err(|e| PulseError::Other(format!("rendering {EMAIL_BODY} template: {e}")))
    }
}

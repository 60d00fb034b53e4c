//! Prompt construction for backend calls.
//!
//! The prompt builder is a collaborator: the engine hands it the task type,
//! the user's text, and whether the submission continues a prior edit, and
//! gets back one or more backend-ready prompt strings. The default
//! implementation composes a fixed per-task template with the user's text.

use crate::catalog::TaskType;
use async_trait::async_trait;

/// Inputs for prompt construction.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub task: TaskType,
    pub user_text: Option<String>,
    pub feature: Option<String>,
    /// The submission continues a prior editing context.
    pub prior_edit: bool,
}

/// Builds backend-ready prompt strings.
#[async_trait]
pub trait PromptBuilder: Send + Sync {
    /// One or more prompts for the request; the first is the primary prompt.
    async fn build(&self, request: &PromptRequest) -> Vec<String>;
}

/// Fixed per-task templates for each transformation intent.
const OPTIMIZE_TEMPLATE: &str =
    "Enhance this image: correct exposure and color balance, reduce noise, \
     and sharpen details while preserving the original composition.";
const EDIT_TEMPLATE: &str = "Transform this image as described, keeping unchanged regions intact.";
const REFINE_TEMPLATE: &str =
    "Refine the previous result with the adjustments described, preserving \
     everything that already matches the intent.";
const EXPORT_TEMPLATE: &str = "Generate a high-resolution image as described.";

/// Default template-based prompt builder.
#[derive(Debug, Default, Clone)]
pub struct TemplatePromptBuilder;

impl TemplatePromptBuilder {
    fn template_for(task: TaskType) -> &'static str {
        match task {
            TaskType::Optimize => OPTIMIZE_TEMPLATE,
            TaskType::Edit => EDIT_TEMPLATE,
            TaskType::Refine => REFINE_TEMPLATE,
            TaskType::Export => EXPORT_TEMPLATE,
        }
    }
}

#[async_trait]
impl PromptBuilder for TemplatePromptBuilder {
    async fn build(&self, request: &PromptRequest) -> Vec<String> {
        let mut prompt = String::from(Self::template_for(request.task));

        if let Some(text) = request
            .user_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            prompt.push_str(" Instructions: ");
            prompt.push_str(text);
        }

        if request.prior_edit && request.task != TaskType::Refine {
            prompt.push_str(" Apply on top of the previous edit in this session.");
        }

        vec![prompt]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: TaskType) -> PromptRequest {
        PromptRequest {
            task,
            user_text: None,
            feature: None,
            prior_edit: false,
        }
    }

    #[tokio::test]
    async fn test_builds_one_primary_prompt() {
        let builder = TemplatePromptBuilder;
        let prompts = builder.build(&request(TaskType::Optimize)).await;

        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Enhance this image"));
    }

    #[tokio::test]
    async fn test_user_text_is_appended() {
        let builder = TemplatePromptBuilder;
        let mut req = request(TaskType::Edit);
        req.user_text = Some("make the sky stormy".to_string());

        let prompts = builder.build(&req).await;
        assert!(prompts[0].contains("make the sky stormy"));
        assert!(prompts[0].starts_with(EDIT_TEMPLATE));
    }

    #[tokio::test]
    async fn test_blank_user_text_is_ignored() {
        let builder = TemplatePromptBuilder;
        let mut req = request(TaskType::Edit);
        req.user_text = Some("   ".to_string());

        let prompts = builder.build(&req).await;
        assert_eq!(prompts[0], EDIT_TEMPLATE);
    }

    #[tokio::test]
    async fn test_prior_edit_marks_continuation() {
        let builder = TemplatePromptBuilder;
        let mut req = request(TaskType::Edit);
        req.prior_edit = true;

        let prompts = builder.build(&req).await;
        assert!(prompts[0].contains("previous edit"));

        // Refine templates already speak about the previous result.
        let mut refine = request(TaskType::Refine);
        refine.prior_edit = true;
        let prompts = builder.build(&refine).await;
        assert_eq!(prompts[0], REFINE_TEMPLATE);
    }
}

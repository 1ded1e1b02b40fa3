//! Batch shape resolution.
//!
//! A [`BatchDescription`] names its items in one of two ways: a list of
//! fully rendered prompts, or a list of variable maps applied to a single
//! template. [`BatchShape::new`] is the one place where the two invariants
//! are checked:
//!
//! - **exactly one** of the prompt list and the variable list is non-empty;
//! - a variable list requires a non-blank template.
//!
//! Downstream code matches on [`BatchShape`] instead of re-testing which list
//! is populated. [`BatchDescription::normalize`] then renders every item,
//! producing a [`NormalizedBatch`] whose `items[i]` corresponds to source
//! entry `i`.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use headwater_api::batch::BatchDescription;
//! use headwater_api::conduit::{BatchRequest, GenerationParams};
//!
//! let vars = vec![
//!     BTreeMap::from([("name".to_string(), "Alice".to_string())]),
//!     BTreeMap::from([("name".to_string(), "Bob".to_string())]),
//! ];
//! let req = BatchRequest::from_template("Hello {{name}}", vars, GenerationParams::new("m1"));
//! let batch = BatchDescription::from(req).normalize().unwrap();
//! let prompts: Vec<&str> = batch.items.iter().map(|i| i.prompt()).collect();
//! assert_eq!(prompts, ["Hello Alice", "Hello Bob"]);
//! ```

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};

use crate::conduit::{BatchRequest, ConduitOptions, GenerationParams};
use crate::error::{ShapeError, TemplateError};

/// Named variables for one templated item.
pub type Variables = BTreeMap<String, String>;

/// Domain form of a batch request, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDescription {
    pub prompt_strings: Vec<String>,
    pub input_variables: Vec<Variables>,
    pub template: Option<String>,
    pub params: GenerationParams,
    pub options: ConduitOptions,
}

impl From<BatchRequest> for BatchDescription {
    fn from(req: BatchRequest) -> Self {
        Self {
            prompt_strings: req.prompt_strings_list,
            input_variables: req.input_variables_list,
            template: req.prompt_str,
            params: req.params,
            options: req.options,
        }
    }
}

/// Validated shape of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchShape {
    PromptList(Vec<String>),
    TemplateWithVariables {
        template: String,
        variables: Vec<Variables>,
    },
}

impl BatchShape {
    /// Check the two shape invariants and tag the result.
    ///
    /// A template supplied alongside a prompt list is ignored: prompts are
    /// already rendered.
    pub fn new(
        prompts: Vec<String>,
        variables: Vec<Variables>,
        template: Option<String>,
    ) -> Result<Self, ShapeError> {
        match (prompts.is_empty(), variables.is_empty()) {
            (false, true) => Ok(BatchShape::PromptList(prompts)),
            (true, false) => match template {
                Some(t) if !t.trim().is_empty() => Ok(BatchShape::TemplateWithVariables {
                    template: t,
                    variables,
                }),
                _ => Err(ShapeError::MissingTemplate),
            },
            _ => Err(ShapeError::AmbiguousOrEmpty),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchShape::PromptList(prompts) => prompts.len(),
            BatchShape::TemplateWithVariables { variables, .. } => variables.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize every item, in source order.
    ///
    /// The template is compiled once; a compile error or any failing item
    /// rejects the whole batch.
    pub fn into_items(self) -> Result<Vec<BatchItem>, ShapeError> {
        match self {
            BatchShape::PromptList(prompts) => Ok(prompts.into_iter().map(BatchItem::Prompt).collect()),
            BatchShape::TemplateWithVariables {
                template,
                variables,
            } => {
                let env = strict_env();
                let compiled = env
                    .template_from_str(&template)
                    .map_err(|e| ShapeError::Template {
                        index: 0,
                        source: TemplateError::new(e.to_string()),
                    })?;

                variables
                    .into_iter()
                    .enumerate()
                    .map(|(index, vars)| {
                        let rendered = compiled.render(&vars).map_err(|e| ShapeError::Template {
                            index,
                            source: TemplateError::new(e.to_string()),
                        })?;
                        Ok(BatchItem::Templated {
                            variables: vars,
                            rendered,
                        })
                    })
                    .collect()
            }
        }
    }
}

/// One concrete generation input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItem {
    Prompt(String),
    Templated { variables: Variables, rendered: String },
}

impl BatchItem {
    /// The prompt text sent to the model.
    pub fn prompt(&self) -> &str {
        match self {
            BatchItem::Prompt(p) => p,
            BatchItem::Templated { rendered, .. } => rendered,
        }
    }
}

/// A validated, fully rendered batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub items: Vec<BatchItem>,
    pub params: GenerationParams,
    pub options: ConduitOptions,
}

impl BatchDescription {
    /// Validate the shape without rendering.
    pub fn shape(&self) -> Result<BatchShape, ShapeError> {
        BatchShape::new(
            self.prompt_strings.clone(),
            self.input_variables.clone(),
            self.template.clone(),
        )
    }

    /// Number of items the description declares.
    pub fn declared_len(&self) -> usize {
        self.prompt_strings.len() + self.input_variables.len()
    }

    /// Validate and render into a [`NormalizedBatch`].
    pub fn normalize(self) -> Result<NormalizedBatch, ShapeError> {
        let shape = BatchShape::new(self.prompt_strings, self.input_variables, self.template)?;
        let items = shape.into_items()?;
        Ok(NormalizedBatch {
            items,
            params: self.params,
            options: self.options,
        })
    }
}

/// Render a single template against one variable map.
///
/// Variables referenced by the template but absent from `variables` are an
/// error rather than an empty string.
pub fn render(template: &str, variables: &Variables) -> Result<String, TemplateError> {
    let env = strict_env();
    env.render_str(template, variables)
        .map_err(|e| TemplateError::new(e.to_string()))
}

fn strict_env<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn description(prompts: Vec<String>, vars: Vec<Variables>, template: Option<&str>) -> BatchDescription {
        BatchDescription {
            prompt_strings: prompts,
            input_variables: vars,
            template: template.map(str::to_string),
            params: GenerationParams::new("m1"),
            options: ConduitOptions::default(),
        }
    }

    fn named(name: &str) -> Variables {
        BTreeMap::from([("name".to_string(), name.to_string())])
    }

    #[test]
    fn prompt_list_keeps_order() {
        let batch = description(vec!["Say hi".into(), "Say bye".into()], vec![], None)
            .normalize()
            .unwrap();
        assert_eq!(
            batch.items,
            vec![
                BatchItem::Prompt("Say hi".into()),
                BatchItem::Prompt("Say bye".into())
            ]
        );
        assert_eq!(batch.params.model, "m1");
    }

    #[test]
    fn template_renders_each_variable_map() {
        let batch = description(vec![], vec![named("Alice"), named("Bob")], Some("Hello {{name}}"))
            .normalize()
            .unwrap();
        let prompts: Vec<&str> = batch.items.iter().map(BatchItem::prompt).collect();
        assert_eq!(prompts, ["Hello Alice", "Hello Bob"]);
    }

    #[test]
    fn missing_variable_fails_whole_batch_with_index() {
        let vars = vec![named("Alice"), BTreeMap::from([("other".to_string(), "x".to_string())])];
        let err = description(vec![], vars, Some("Hello {{ name }}"))
            .normalize()
            .unwrap_err();
        match err {
            ShapeError::Template { index, .. } => assert_eq!(index, 1),
            other => panic!("expected template error, got {other:?}"),
        }
    }

    #[test]
    fn template_syntax_error_is_shape_error() {
        let err = description(vec![], vec![named("Alice")], Some("Hello {{ name"))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, ShapeError::Template { index: 0, .. }));
    }

    #[test]
    fn whitespace_template_counts_as_missing() {
        let err = description(vec![], vec![named("Alice")], Some("   "))
            .normalize()
            .unwrap_err();
        assert_eq!(err, ShapeError::MissingTemplate);
    }

    #[test]
    fn template_is_ignored_for_prompt_lists() {
        let shape = description(vec!["a".into()], vec![], Some("{{ unused }}"))
            .shape()
            .unwrap();
        assert_eq!(shape, BatchShape::PromptList(vec!["a".into()]));
    }

    #[test]
    fn render_single() {
        assert_eq!(render("Hi {{ name }}!", &named("Ann")).unwrap(), "Hi Ann!");
        assert!(render("Hi {{ name }}!", &Variables::new()).is_err());
    }

    fn vars_strategy() -> impl Strategy<Value = Vec<Variables>> {
        prop::collection::vec("[a-zA-Z ]{0,12}".prop_map(|s| named(&s)), 1..16)
    }

    proptest! {
        #[test]
        fn both_empty_is_rejected(template in proptest::option::of("[a-z{} ]{0,10}")) {
            let err = description(vec![], vec![], template.as_deref()).normalize().unwrap_err();
            prop_assert_eq!(err, ShapeError::AmbiguousOrEmpty);
        }

        #[test]
        fn both_populated_is_rejected(
            prompts in prop::collection::vec(".{0,8}", 1..8),
            vars in vars_strategy(),
        ) {
            let err = description(prompts, vars, Some("{{ name }}")).normalize().unwrap_err();
            prop_assert_eq!(err, ShapeError::AmbiguousOrEmpty);
        }

        #[test]
        fn variables_without_template_are_rejected(
            vars in vars_strategy(),
            template in proptest::option::of("[ \t]{0,4}"),
        ) {
            let err = description(vec![], vars, template.as_deref()).normalize().unwrap_err();
            prop_assert_eq!(err, ShapeError::MissingTemplate);
        }

        #[test]
        fn prompt_lists_normalize_one_to_one(prompts in prop::collection::vec(".{0,16}", 1..32)) {
            let batch = description(prompts.clone(), vec![], None).normalize().unwrap();
            prop_assert_eq!(batch.items.len(), prompts.len());
            for (item, prompt) in batch.items.iter().zip(&prompts) {
                prop_assert_eq!(item.prompt(), prompt.as_str());
            }
        }

        #[test]
        fn variable_lists_normalize_one_to_one(vars in vars_strategy()) {
            let batch = description(vec![], vars.clone(), Some("Hello {{ name }}")).normalize().unwrap();
            prop_assert_eq!(batch.items.len(), vars.len());
            for (item, v) in batch.items.iter().zip(&vars) {
                prop_assert_eq!(item.prompt(), format!("Hello {}", v["name"]));
            }
        }
    }
}

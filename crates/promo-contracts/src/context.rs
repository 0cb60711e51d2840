use indexmap::IndexMap;
use serde::Serialize;

use crate::chain::{field, ChainVariant, StepSpec};
use crate::error::{PromoError, PromoResult};
use crate::request::RequestContext;

/// Accumulating key/value state for one chain run.
///
/// Keys keep insertion order so summaries read in step order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChainContext {
    fields: IndexMap<String, String>,
}

impl ChainContext {
    /// Seeds the context with exactly the fields `variant` expects up front.
    ///
    /// `image_path` is seeded from the declared product image; the request must
    /// already have been validated for the variant's kind.
    pub fn seed(request: &RequestContext, variant: &ChainVariant) -> PromoResult<Self> {
        let mut context = Self::default();
        for key in variant.seed_fields {
            let value = match *key {
                field::USER_NAME => request.user_name.clone(),
                field::PRODUCT_NAME => request.product_name.clone(),
                field::PRODUCT_DETAILS => request.product_details.clone(),
                field::COST => request.cost_value().to_string(),
                field::LANGUAGE => request.language.to_string(),
                field::USER_STORY => request
                    .user_story
                    .clone()
                    .ok_or_else(|| PromoError::missing(field::USER_STORY))?,
                field::IMAGE_PATH => request
                    .declared_image()
                    .map(|path| path.to_string_lossy().into_owned())
                    .ok_or_else(|| PromoError::missing("product_image_path"))?,
                other => {
                    return Err(PromoError::Chain(format!(
                        "chain '{}' seeds unknown field '{other}'",
                        variant.name
                    )))
                }
            };
            context.fields.insert((*key).to_string(), value);
        }
        Ok(context)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Read-only view restricted to the step's declared inputs.
    pub fn inputs_for(&self, step: &StepSpec) -> PromoResult<StepInputs> {
        let mut values = IndexMap::new();
        for key in step.inputs {
            let value = self.get(key).ok_or_else(|| {
                PromoError::Chain(format!(
                    "step '{}' needs '{}' but the context does not hold it",
                    step.name, key
                ))
            })?;
            values.insert(*key, value.to_string());
        }
        Ok(StepInputs {
            step: step.name,
            values,
        })
    }

    /// Merges step results. Every declared output must be present and nothing
    /// else is accepted.
    pub fn merge(&mut self, step: &StepSpec, outputs: StepOutputs) -> PromoResult<()> {
        if let Some(extra) = outputs
            .values
            .keys()
            .find(|key| !step.outputs.contains(&key.as_str()))
        {
            return Err(PromoError::Chain(format!(
                "step '{}' returned undeclared field '{}'",
                step.name, extra
            )));
        }
        if let Some(missing) = step
            .outputs
            .iter()
            .find(|key| !outputs.values.contains_key(**key))
        {
            return Err(PromoError::Chain(format!(
                "step '{}' did not return '{}'",
                step.name, missing
            )));
        }
        for (key, value) in outputs.values {
            self.fields.insert(key, value);
        }
        Ok(())
    }
}

/// The declared inputs of one step, nothing more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInputs {
    step: &'static str,
    values: IndexMap<&'static str, String>,
}

impl StepInputs {
    pub fn get(&self, key: &str) -> PromoResult<&str> {
        self.values.get(key).map(String::as_str).ok_or_else(|| {
            PromoError::Chain(format!(
                "step '{}' read undeclared input '{}'",
                self.step, key
            ))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutputs {
    values: IndexMap<String, String>,
}

impl StepOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{PRICE_ONLY, STORY, WITHOUT_IMAGE, WITH_IMAGE};
    use crate::request::Language;

    fn request() -> RequestContext {
        RequestContext::new("alice", "Mug", "glazed stoneware")
            .with_cost("fifty")
            .with_language(Language::Tamil)
    }

    #[test]
    fn seed_holds_only_the_variant_fields() -> anyhow::Result<()> {
        let context = ChainContext::seed(&request(), &PRICE_ONLY)?;
        let keys: Vec<&str> = context.iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec!["user_name", "product_name", "product_details", "cost", "language"]
        );
        assert_eq!(context.get(field::COST), Some("0"));
        assert_eq!(context.get(field::LANGUAGE), Some("Tamil"));
        assert_eq!(context.get(field::IMAGE_PATH), None);
        Ok(())
    }

    #[test]
    fn seed_copies_the_declared_image_for_image_variants() -> anyhow::Result<()> {
        let context = ChainContext::seed(&request().with_image("/tmp/mug.png"), &WITH_IMAGE)?;
        assert_eq!(context.get(field::IMAGE_PATH), Some("/tmp/mug.png"));

        let err = ChainContext::seed(&request(), &STORY).unwrap_err();
        assert!(matches!(err, PromoError::MissingField(_)));
        Ok(())
    }

    #[test]
    fn inputs_view_hides_undeclared_fields() -> anyhow::Result<()> {
        let context = ChainContext::seed(&request(), &WITHOUT_IMAGE)?;
        let summarize = &WITHOUT_IMAGE.steps[0];
        let inputs = context.inputs_for(summarize)?;
        assert_eq!(inputs.get(field::PRODUCT_NAME)?, "Mug");
        assert!(inputs.get(field::COST).is_err());
        Ok(())
    }

    #[test]
    fn inputs_for_reports_missing_upstream_output() -> anyhow::Result<()> {
        let context = ChainContext::seed(&request(), &WITHOUT_IMAGE)?;
        let caption = &WITHOUT_IMAGE.steps[1];
        let err = context.inputs_for(caption).unwrap_err();
        assert!(err.to_string().contains("'summary'"));
        Ok(())
    }

    #[test]
    fn merge_enforces_declared_outputs() -> anyhow::Result<()> {
        let mut context = ChainContext::seed(&request(), &WITHOUT_IMAGE)?;
        let caption = &WITHOUT_IMAGE.steps[1];

        let partial = StepOutputs::new().with(field::CAPTION, "Buy it");
        assert!(context.merge(caption, partial).is_err());

        let extra = StepOutputs::new()
            .with(field::CAPTION, "Buy it")
            .with(field::CONTACT_INFO, "@alice")
            .with(field::VIDEO_PATH, "/tmp/v.mp4");
        assert!(context.merge(caption, extra).is_err());
        assert_eq!(context.get(field::CAPTION), None);

        let ok = StepOutputs::new()
            .with(field::CAPTION, "Buy it")
            .with(field::CONTACT_INFO, "@alice");
        context.merge(caption, ok)?;
        assert_eq!(context.get(field::CONTACT_INFO), Some("@alice"));
        Ok(())
    }
}

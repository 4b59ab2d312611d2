//! Structured command descriptions.
//!
//! A [`CommandSpec`] renders purpose, usage guidance, examples and output
//! format into the description the model sees. Parameters come from the
//! argument type via `schemars`, so the schema and the deserializer agree.

use crate::Definition;

/// A structured command description.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub name: String,
    /// One-sentence imperative purpose.
    pub purpose: String,
    pub when_to_use: String,
    /// Guidance that keeps the model from confusing similar commands.
    pub when_not_to_use: String,
    pub parameters: serde_json::Value,
    /// `(call, effect)` pairs.
    pub examples: Vec<(String, String)>,
    pub output_format: String,
}

impl CommandSpec {
    pub fn builder(name: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder {
            spec: CommandSpec {
                name: name.into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
                ..Default::default()
            },
        }
    }

    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose.trim_end_matches('.'));
        if !self.when_to_use.is_empty() {
            desc.push_str(&format!("\nWhen to use: {}", self.when_to_use));
        }
        if !self.when_not_to_use.is_empty() {
            desc.push_str(&format!("\nWhen NOT to use: {}", self.when_not_to_use));
        }
        if !self.examples.is_empty() {
            desc.push_str("\nExamples:");
            for (input, output) in &self.examples {
                desc.push_str(&format!("\n  - {input} → {output}"));
            }
        }
        if !self.output_format.is_empty() {
            desc.push_str(&format!("\nOutput format: {}", self.output_format));
        }
        desc
    }

    pub fn to_definition(&self) -> Definition {
        Definition::new(self.name.clone(), self.to_description(), self.parameters.clone())
    }
}

pub struct CommandSpecBuilder {
    spec: CommandSpec,
}

impl CommandSpecBuilder {
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.spec.purpose = purpose.into();
        self
    }

    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.spec.when_to_use = when.into();
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.spec.when_not_to_use = when_not.into();
        self
    }

    pub fn parameters(mut self, params: serde_json::Value) -> Self {
        self.spec.parameters = params;
        self
    }

    /// Derive parameters from a type implementing `schemars::JsonSchema`.
    pub fn parameters_for<T: schemars::JsonSchema>(self) -> Self {
        self.parameters(crate::json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.examples.push((input.into(), output.into()));
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.spec.output_format = format.into();
        self
    }

    pub fn build(self) -> CommandSpec {
        self.spec
    }

    /// Shortcut for `.build().to_definition()`.
    pub fn to_definition(self) -> Definition {
        self.spec.to_definition()
    }
}

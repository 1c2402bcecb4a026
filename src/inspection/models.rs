//! Inspection API models: rules, classifications, severities, and the
//! parsed inspection result.

use serde::{Deserialize, Serialize};

/// The closed set of inspection rules the service understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleName {
	#[serde(rename = "Code Detection")]
	CodeDetection,
	#[serde(rename = "Harassment")]
	Harassment,
	#[serde(rename = "Hate Speech")]
	HateSpeech,
	#[serde(rename = "PCI")]
	Pci,
	#[serde(rename = "PHI")]
	Phi,
	#[serde(rename = "PII")]
	Pii,
	#[serde(rename = "Prompt Injection")]
	PromptInjection,
	#[serde(rename = "Profanity")]
	Profanity,
	#[serde(rename = "Sexual Content & Exploitation")]
	SexualContentExploitation,
	#[serde(rename = "Social Division & Polarization")]
	SocialDivisionPolarization,
	#[serde(rename = "Violence & Public Safety Threats")]
	ViolencePublicSafetyThreats,
}

impl RuleName {
	pub const ALL: [RuleName; 11] = [
		RuleName::CodeDetection,
		RuleName::Harassment,
		RuleName::HateSpeech,
		RuleName::Pci,
		RuleName::Phi,
		RuleName::Pii,
		RuleName::PromptInjection,
		RuleName::Profanity,
		RuleName::SexualContentExploitation,
		RuleName::SocialDivisionPolarization,
		RuleName::ViolencePublicSafetyThreats,
	];

	pub(crate) fn from_wire(value: &str) -> Option<RuleName> {
		serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
	}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
	#[serde(rename = "SECURITY_VIOLATION")]
	SecurityViolation,
	#[serde(rename = "PRIVACY_VIOLATION")]
	PrivacyViolation,
	#[serde(rename = "SAFETY_VIOLATION")]
	SafetyViolation,
	#[serde(rename = "RELEVANCE_VIOLATION")]
	RelevanceViolation,
	#[serde(rename = "NONE_VIOLATION")]
	NoneViolation,
}

impl Classification {
	pub(crate) fn from_wire(value: &str) -> Option<Classification> {
		serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
	}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
	#[serde(rename = "NONE_SEVERITY")]
	None,
	#[serde(rename = "LOW_SEVERITY")]
	Low,
	#[serde(rename = "MEDIUM_SEVERITY")]
	Medium,
	#[serde(rename = "HIGH_SEVERITY")]
	High,
	#[serde(rename = "CRITICAL_SEVERITY")]
	Critical,
}

impl Severity {
	pub(crate) fn from_wire(value: &str) -> Option<Severity> {
		serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
	}
}

/// One inspection rule. Entity types only apply to the data-loss rules
/// (PII, PCI, PHI); every other rule leaves them unset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rule_name: Option<RuleName>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub entity_types: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rule_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub classification: Option<Classification>,
}

impl Rule {
	pub fn named(rule_name: RuleName) -> Self {
		Rule {
			rule_name: Some(rule_name),
			entity_types: None,
			rule_id: None,
			classification: None,
		}
	}

	pub fn with_entity_types(rule_name: RuleName, entity_types: &[&str]) -> Self {
		Rule {
			rule_name: Some(rule_name),
			entity_types: Some(entity_types.iter().map(|e| e.to_string()).collect()),
			rule_id: None,
			classification: None,
		}
	}
}

/// Canonical entity sets for the data-loss rules.
pub const PII_ENTITIES: [&str; 10] = [
	"Email Address",
	"IP Address",
	"Name",
	"Phone Number",
	"Postal Address",
	"Social Security Number (SSN)",
	"Driver's License Number",
	"Passport Number",
	"Date of Birth",
	"Username",
];

pub const PCI_ENTITIES: [&str; 6] = [
	"Credit/Debit Card Number",
	"CVV",
	"Bank Account Number",
	"IBAN Code",
	"SWIFT Code",
	"Routing Number",
];

pub const PHI_ENTITIES: [&str; 6] = [
	"Medical Record Number",
	"Health Insurance Policy Number",
	"Diagnosis",
	"Medication",
	"Treatment",
	"Healthcare Provider Name",
];

/// One rule per [`RuleName`], with entity types attached only where the
/// rule requires them.
pub fn default_enabled_rules() -> Vec<Rule> {
	RuleName::ALL
		.iter()
		.map(|rn| match rn {
			RuleName::Pii => Rule::with_entity_types(*rn, &PII_ENTITIES),
			RuleName::Pci => Rule::with_entity_types(*rn, &PCI_ENTITIES),
			RuleName::Phi => Rule::with_entity_types(*rn, &PHI_ENTITIES),
			other => Rule::named(*other),
		})
		.collect()
}

/// Caller-supplied context forwarded with an inspection request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub src_app: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dst_app: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub src_ip: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dst_ip: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dst_host: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sni: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_transaction_id: Option<String>,
}

/// Per-request inspection configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionConfig {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub enabled_rules: Vec<Rule>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub integration_profile_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub integration_profile_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub integration_tenant_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub integration_type: Option<String>,
}

/// Parsed inspection verdict.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InspectResponse {
	pub classifications: Vec<Classification>,
	pub is_safe: bool,
	pub severity: Option<Severity>,
	pub rules: Option<Vec<Rule>>,
	pub attack_technique: Option<String>,
	pub explanation: Option<String>,
	pub client_transaction_id: Option<String>,
	pub event_id: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rule_names_serialize_to_service_labels() {
		assert_eq!(
			serde_json::to_value(RuleName::PromptInjection).unwrap(),
			serde_json::json!("Prompt Injection")
		);
		assert_eq!(
			serde_json::to_value(RuleName::ViolencePublicSafetyThreats).unwrap(),
			serde_json::json!("Violence & Public Safety Threats")
		);
		assert_eq!(RuleName::from_wire("PII"), Some(RuleName::Pii));
		assert_eq!(RuleName::from_wire("Unknown Rule"), None);
	}

	#[test]
	fn default_rules_attach_entities_only_to_data_loss_rules() {
		let rules = default_enabled_rules();
		assert_eq!(rules.len(), RuleName::ALL.len());
		for rule in &rules {
			match rule.rule_name.unwrap() {
				RuleName::Pii | RuleName::Pci | RuleName::Phi => {
					assert!(rule.entity_types.as_ref().is_some_and(|e| !e.is_empty()));
				},
				_ => assert!(rule.entity_types.is_none()),
			}
		}
	}

	#[test]
	fn serialized_rule_skips_unset_fields() {
		let value = serde_json::to_value(Rule::named(RuleName::Harassment)).unwrap();
		assert_eq!(value, serde_json::json!({"rule_name": "Harassment"}));
	}
}

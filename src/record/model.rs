//! Onboarding record data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;

/// Which kind of party the application is for. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Agent,
    Customer,
}

impl EntityKind {
    /// Category key used in the translation table and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "AGENT",
            Self::Customer => "CUSTOMER",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AGENT" => Ok(Self::Agent),
            "CUSTOMER" => Ok(Self::Customer),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Record subtype. `Parent` records never go to CM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyType {
    /// Umbrella record grouping child parties; internal only.
    Parent,
    /// Party registered under a parent.
    Child,
    /// Party with no parent.
    Standalone,
}

impl PartyType {
    pub fn is_parent(&self) -> bool {
        matches!(self, Self::Parent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "PARENT",
            Self::Child => "CHILD",
            Self::Standalone => "STANDALONE",
        }
    }
}

impl std::fmt::Display for PartyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PartyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PARENT" => Ok(Self::Parent),
            "CHILD" => Ok(Self::Child),
            "STANDALONE" => Ok(Self::Standalone),
            other => Err(format!("unknown party type: {other}")),
        }
    }
}

/// Last-seen mirror of CM's response. Overwritten on every call attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMirror {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
}

impl ExternalMirror {
    /// Nothing recorded yet, as left by a claim into RELEASE_TO_CM.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.status_code.is_none()
            && self.error_reason.is_none()
            && self.status_msg.is_none()
    }
}

/// Contact channel slot. Each source field maps to exactly one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactMediumType {
    Mobile,
    Phone,
    Fax,
    Email,
}

impl ContactMediumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "MOBILE",
            Self::Phone => "PHONE",
            Self::Fax => "FAX",
            Self::Email => "EMAIL",
        }
    }
}

/// One contact channel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMedium {
    pub medium_type: ContactMediumType,
    pub value: String,
}

/// Source contact fields as captured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fax: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ContactDetails {
    /// Contact media in slot order (mobile, phone, fax, email), skipping
    /// empty source fields.
    pub fn media(&self) -> Vec<ContactMedium> {
        [
            (ContactMediumType::Mobile, &self.mobile),
            (ContactMediumType::Phone, &self.phone),
            (ContactMediumType::Fax, &self.fax),
            (ContactMediumType::Email, &self.email),
        ]
        .into_iter()
        .filter_map(|(medium_type, value)| {
            present(value).map(|v| ContactMedium {
                medium_type,
                value: v.to_string(),
            })
        })
        .collect()
    }
}

/// Role of an address entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressRole {
    Billing,
    Installation,
}

/// Source address fields as captured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl AddressDetails {
    pub fn is_empty(&self) -> bool {
        present(&self.street).is_none()
            && present(&self.locality).is_none()
            && present(&self.postal_code).is_none()
            && present(&self.country).is_none()
    }
}

/// A built address entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub role: AddressRole,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

/// One Agent or Customer application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingRecord {
    /// Unique ID, immutable.
    pub id: Uuid,
    /// Agent or customer, fixed at creation.
    pub entity_kind: EntityKind,
    /// Subtype deciding whether CM is involved at all.
    pub party_type: PartyType,
    /// Lifecycle stage.
    pub stage: Stage,
    /// Free-text outcome summary correlated with `stage`.
    pub status: String,
    /// CM party id ("sapBpId"). Set once, never changed afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_party_id: Option<String>,
    /// Mirror of the last CM response.
    #[serde(default)]
    pub external: ExternalMirror,

    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    /// Domain value, translated to a CM code at request build time.
    pub account_category: String,
    /// Domain value, translated to a CM code at request build time.
    pub division: String,
    /// Domain value, translated to a CM code at request build time.
    pub sales_org: String,
    /// Optional; CM's default channel is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_channel: Option<String>,
    #[serde(default)]
    pub contact: ContactDetails,
    #[serde(default)]
    pub billing_address: AddressDetails,
    #[serde(default)]
    pub installation_address: AddressDetails,

    /// Actor who captured the record.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingRecord {
    /// Create a new record in CAPTURED with empty optional data.
    pub fn new(entity_kind: EntityKind, party_type: PartyType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity_kind,
            party_type,
            stage: Stage::Captured,
            status: Stage::Captured.status_label().to_string(),
            external_party_id: None,
            external: ExternalMirror::default(),
            name: name.into(),
            tax_id: None,
            registration_number: None,
            account_category: String::new(),
            division: String::new(),
            sales_org: String::new(),
            distribution_channel: None,
            contact: ContactDetails::default(),
            billing_address: AddressDetails::default(),
            installation_address: AddressDetails::default(),
            created_by: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set the three translated classification fields.
    pub fn with_classification(
        mut self,
        account_category: impl Into<String>,
        division: impl Into<String>,
        sales_org: impl Into<String>,
    ) -> Self {
        self.account_category = account_category.into();
        self.division = division.into();
        self.sales_org = sales_org.into();
        self
    }

    /// Builder: set the distribution channel.
    pub fn with_distribution_channel(mut self, channel: impl Into<String>) -> Self {
        self.distribution_channel = Some(channel.into());
        self
    }

    /// Builder: set the tax id.
    pub fn with_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.tax_id = Some(tax_id.into());
        self
    }

    /// Builder: set the registration number.
    pub fn with_registration_number(mut self, number: impl Into<String>) -> Self {
        self.registration_number = Some(number.into());
        self
    }

    /// Builder: set contact details.
    pub fn with_contact(mut self, contact: ContactDetails) -> Self {
        self.contact = contact;
        self
    }

    /// Builder: set the billing address.
    pub fn with_billing_address(mut self, address: AddressDetails) -> Self {
        self.billing_address = address;
        self
    }

    /// Builder: set the installation address.
    pub fn with_installation_address(mut self, address: AddressDetails) -> Self {
        self.installation_address = address;
        self
    }

    /// Contact media derived from the source contact fields.
    pub fn contact_media(&self) -> Vec<ContactMedium> {
        self.contact.media()
    }

    /// Address entries derived from the source address fields.
    ///
    /// Billing needs a country; installation needs a country and a locality.
    pub fn addresses(&self) -> Vec<Address> {
        let mut out = Vec::new();
        if let Some(country) = present(&self.billing_address.country) {
            out.push(build_address(AddressRole::Billing, country, &self.billing_address));
        }
        if let (Some(country), Some(_)) = (
            present(&self.installation_address.country),
            present(&self.installation_address.locality),
        ) {
            out.push(build_address(
                AddressRole::Installation,
                country,
                &self.installation_address,
            ));
        }
        out
    }

    /// Whether CM must be called for this record.
    pub fn requires_external_call(&self) -> bool {
        !self.party_type.is_parent()
    }
}

fn build_address(role: AddressRole, country: &str, details: &AddressDetails) -> Address {
    Address {
        role,
        country: country.to_string(),
        locality: present(&details.locality).map(String::from),
        street: present(&details.street).map(String::from),
        postal_code: present(&details.postal_code).map(String::from),
    }
}

/// Trimmed value of an optional source field, `None` when blank.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

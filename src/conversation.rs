//! Add-food conversation as a pure state machine.
//!
//! ```text
//! Idle --Start--> AwaitingProductName --name--> CheckingCatalogue
//!   CheckingCatalogue --CatalogueChecked--> AwaitingWeight
//!   AwaitingWeight --grams (known product)--> Idle + Log
//!   AwaitingWeight --grams (new product)--> AwaitingCalories
//!   AwaitingCalories --kcal/100g--> Idle + Log
//!   AwaitingCalories --"find"--> SearchingFoodDatabase
//!   SearchingFoodDatabase --one candidate--> AwaitingLookupConfirmation
//!   SearchingFoodDatabase --several--> AwaitingLookupChoice --number--> AwaitingLookupConfirmation
//!   SearchingFoodDatabase --none--> AwaitingCalories
//!   AwaitingLookupChoice --"manual"--> AwaitingCalories
//!   AwaitingLookupConfirmation --"yes"--> Idle + Log
//!   AwaitingLookupConfirmation --"edit"--> AwaitingCalories
//! ```
//!
//! `Cancel` returns to `Idle` from any state. Invalid input keeps the state.
//! The transitions never do I/O: `CheckCatalogue` and `SearchFoodDatabase`
//! outcomes ask the caller to fetch data and feed it back as the next input.

use chrono::{DateTime, Utc};

use crate::domain::{
    ConsumptionEntry, MAX_CALORIES_PER_100G, MAX_PORTION_GRAMS, calories_for_portion,
};
use crate::error::InputError;
use crate::lookup::FoodCandidate;

/// Longest accepted product name, in characters.
pub const MAX_PRODUCT_NAME_LEN: usize = 250;

/// Keyword that starts a food database search instead of typing calories.
pub const FIND_KEYWORD: &str = "find";

/// Keyword that skips the search results and asks for calories instead.
pub const MANUAL_KEYWORD: &str = "manual";

/// Per-chat position in the add-food flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AddFoodState {
    #[default]
    Idle,
    AwaitingProductName,
    CheckingCatalogue {
        product: String,
    },
    AwaitingWeight {
        product: String,
        /// Energy density from the user's catalogue, if the product is known.
        known_calories: Option<u32>,
    },
    AwaitingCalories {
        product: String,
        weight_grams: u32,
    },
    SearchingFoodDatabase {
        product: String,
        weight_grams: u32,
    },
    AwaitingLookupChoice {
        product: String,
        weight_grams: u32,
        candidates: Vec<FoodCandidate>,
    },
    AwaitingLookupConfirmation {
        weight_grams: u32,
        candidate: FoodCandidate,
    },
}

impl AddFoodState {
    /// Returns true while a flow is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self, AddFoodState::Idle)
    }

    /// Returns true while the caller is expected to fetch data for this state.
    fn is_waiting_for_data(&self) -> bool {
        matches!(
            self,
            AddFoodState::CheckingCatalogue { .. } | AddFoodState::SearchingFoodDatabase { .. }
        )
    }
}

/// Something the user did, or data the caller fetched on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Start,
    Cancel,
    Text(String),
    /// Energy density found in the user's catalogue.
    CatalogueChecked(Option<u32>),
    /// Products found in the food database; empty when nothing was found or
    /// the search failed.
    LookupFinished(Vec<FoodCandidate>),
}

/// A completed meal, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodLog {
    pub product: String,
    pub weight_grams: u32,
    pub calories_per_100g: u32,
    /// True when the energy density is new and should be remembered.
    pub remember: bool,
}

impl FoodLog {
    /// Calories of the logged portion.
    pub fn calories_consumed(&self) -> u32 {
        calories_for_portion(self.calories_per_100g, self.weight_grams)
    }

    /// Converts the log into a stored entry under `product_name`.
    pub fn into_entry(self, product_name: String, timestamp: DateTime<Utc>) -> ConsumptionEntry {
        ConsumptionEntry::from_density(
            product_name,
            self.weight_grams,
            self.calories_per_100g,
            timestamp,
        )
    }
}

/// What the caller should do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AskProductName,
    /// Look the product up in the user's catalogue and reply with
    /// [`Input::CatalogueChecked`].
    CheckCatalogue {
        product: String,
    },
    AskWeight {
        product: String,
        known_calories: Option<u32>,
    },
    AskCalories {
        product: String,
    },
    /// Search the food database and reply with [`Input::LookupFinished`].
    SearchFoodDatabase {
        query: String,
    },
    NothingFound {
        product: String,
    },
    ChooseCandidate(Vec<FoodCandidate>),
    ConfirmCandidate(FoodCandidate),
    /// Input was rejected; the state is unchanged.
    Rejected(InputError),
    /// Text arrived while a lookup was still running.
    Busy,
    Cancelled,
    NothingToCancel,
    Log(FoodLog),
    /// Text outside of a flow, or fetched data nobody waits for.
    Ignored,
}

/// Advances the conversation by one input.
pub fn step(state: AddFoodState, input: Input) -> (AddFoodState, Outcome) {
    let text = match input {
        Input::Start => return (AddFoodState::AwaitingProductName, Outcome::AskProductName),
        Input::Cancel if state.is_active() => return (AddFoodState::Idle, Outcome::Cancelled),
        Input::Cancel => return (AddFoodState::Idle, Outcome::NothingToCancel),
        Input::CatalogueChecked(known_calories) => return catalogue_checked(state, known_calories),
        Input::LookupFinished(candidates) => return lookup_finished(state, candidates),
        Input::Text(_) if state.is_waiting_for_data() => return (state, Outcome::Busy),
        Input::Text(text) => text,
    };
    let text = text.trim();

    match state {
        AddFoodState::Idle => (AddFoodState::Idle, Outcome::Ignored),

        AddFoodState::AwaitingProductName => match parse_product_name(text) {
            Ok(product) => {
                let outcome = Outcome::CheckCatalogue {
                    product: product.clone(),
                };
                (AddFoodState::CheckingCatalogue { product }, outcome)
            }
            Err(e) => (AddFoodState::AwaitingProductName, Outcome::Rejected(e)),
        },

        AddFoodState::AwaitingWeight {
            product,
            known_calories,
        } => match parse_weight(text) {
            Ok(weight_grams) => match known_calories {
                Some(calories_per_100g) => (
                    AddFoodState::Idle,
                    Outcome::Log(FoodLog {
                        product,
                        weight_grams,
                        calories_per_100g,
                        remember: false,
                    }),
                ),
                None => {
                    let outcome = Outcome::AskCalories {
                        product: product.clone(),
                    };
                    (
                        AddFoodState::AwaitingCalories {
                            product,
                            weight_grams,
                        },
                        outcome,
                    )
                }
            },
            Err(e) => (
                AddFoodState::AwaitingWeight {
                    product,
                    known_calories,
                },
                Outcome::Rejected(e),
            ),
        },

        AddFoodState::AwaitingCalories {
            product,
            weight_grams,
        } => {
            if text.eq_ignore_ascii_case(FIND_KEYWORD) {
                let outcome = Outcome::SearchFoodDatabase {
                    query: product.clone(),
                };
                return (
                    AddFoodState::SearchingFoodDatabase {
                        product,
                        weight_grams,
                    },
                    outcome,
                );
            }

            match parse_calories(text) {
                Ok(calories_per_100g) => (
                    AddFoodState::Idle,
                    Outcome::Log(FoodLog {
                        product,
                        weight_grams,
                        calories_per_100g,
                        remember: true,
                    }),
                ),
                Err(e) => (
                    AddFoodState::AwaitingCalories {
                        product,
                        weight_grams,
                    },
                    Outcome::Rejected(e),
                ),
            }
        }

        AddFoodState::AwaitingLookupChoice {
            product,
            weight_grams,
            candidates,
        } => {
            if text.eq_ignore_ascii_case(MANUAL_KEYWORD) {
                let outcome = Outcome::AskCalories {
                    product: product.clone(),
                };
                return (
                    AddFoodState::AwaitingCalories {
                        product,
                        weight_grams,
                    },
                    outcome,
                );
            }

            let chosen = text
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|index| candidates.get(index).cloned());

            match chosen {
                Some(candidate) => (
                    AddFoodState::AwaitingLookupConfirmation {
                        weight_grams,
                        candidate: candidate.clone(),
                    },
                    Outcome::ConfirmCandidate(candidate),
                ),
                None => {
                    let max = candidates.len();
                    (
                        AddFoodState::AwaitingLookupChoice {
                            product,
                            weight_grams,
                            candidates,
                        },
                        Outcome::Rejected(InputError::InvalidChoice { max }),
                    )
                }
            }
        }

        AddFoodState::AwaitingLookupConfirmation {
            weight_grams,
            candidate,
        } => match text.to_lowercase().as_str() {
            "yes" | "y" => (
                AddFoodState::Idle,
                Outcome::Log(FoodLog {
                    product: candidate.name,
                    weight_grams,
                    calories_per_100g: candidate.calories_per_100g,
                    remember: true,
                }),
            ),
            "edit" | "no" | "n" => {
                let outcome = Outcome::AskCalories {
                    product: candidate.name.clone(),
                };
                (
                    AddFoodState::AwaitingCalories {
                        product: candidate.name,
                        weight_grams,
                    },
                    outcome,
                )
            }
            _ => (
                AddFoodState::AwaitingLookupConfirmation {
                    weight_grams,
                    candidate,
                },
                Outcome::Rejected(InputError::InvalidConfirmation),
            ),
        },

        // Handled above
        waiting @ (AddFoodState::CheckingCatalogue { .. }
        | AddFoodState::SearchingFoodDatabase { .. }) => (waiting, Outcome::Busy),
    }
}

fn catalogue_checked(state: AddFoodState, known_calories: Option<u32>) -> (AddFoodState, Outcome) {
    match state {
        AddFoodState::CheckingCatalogue { product } => {
            let outcome = Outcome::AskWeight {
                product: product.clone(),
                known_calories,
            };
            (
                AddFoodState::AwaitingWeight {
                    product,
                    known_calories,
                },
                outcome,
            )
        }
        other => (other, Outcome::Ignored),
    }
}

fn lookup_finished(
    state: AddFoodState,
    mut candidates: Vec<FoodCandidate>,
) -> (AddFoodState, Outcome) {
    let (product, weight_grams) = match state {
        AddFoodState::SearchingFoodDatabase {
            product,
            weight_grams,
        } => (product, weight_grams),
        other => return (other, Outcome::Ignored),
    };

    match candidates.len() {
        0 => (
            AddFoodState::AwaitingCalories {
                product: product.clone(),
                weight_grams,
            },
            Outcome::NothingFound { product },
        ),
        1 => {
            let candidate = candidates.remove(0);
            (
                AddFoodState::AwaitingLookupConfirmation {
                    weight_grams,
                    candidate: candidate.clone(),
                },
                Outcome::ConfirmCandidate(candidate),
            )
        }
        _ => (
            AddFoodState::AwaitingLookupChoice {
                product,
                weight_grams,
                candidates: candidates.clone(),
            },
            Outcome::ChooseCandidate(candidates),
        ),
    }
}

fn parse_product_name(text: &str) -> Result<String, InputError> {
    let name = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(InputError::EmptyProductName);
    }
    if name.chars().count() > MAX_PRODUCT_NAME_LEN {
        return Err(InputError::ProductNameTooLong {
            max: MAX_PRODUCT_NAME_LEN,
        });
    }
    Ok(name)
}

fn parse_weight(text: &str) -> Result<u32, InputError> {
    match parse_whole_number(text) {
        Some(grams) if grams > u64::from(MAX_PORTION_GRAMS) => Err(InputError::WeightTooLarge {
            max: MAX_PORTION_GRAMS,
        }),
        Some(grams) if grams > 0 => Ok(grams as u32),
        _ => Err(InputError::InvalidWeight(text.to_string())),
    }
}

fn parse_calories(text: &str) -> Result<u32, InputError> {
    match parse_whole_number(text) {
        Some(calories) if calories > u64::from(MAX_CALORIES_PER_100G) => {
            Err(InputError::CaloriesTooHigh {
                max: MAX_CALORIES_PER_100G,
            })
        }
        Some(calories) => Ok(calories as u32),
        None => Err(InputError::InvalidCalories(text.to_string())),
    }
}

/// Parses plain decimal digits. Values past `u64::MAX` saturate.
fn parse_whole_number(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(text.parse::<u64>().unwrap_or(u64::MAX))
}

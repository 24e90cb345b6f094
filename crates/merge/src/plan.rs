//! Plan and planner abstractions shared by every entity kind.

use crate::error::{MergeError, ReportError};

/// A computed, side-effect-free disposition for one entity (or a list of
/// them).
pub trait Plan {
    /// Whether executing this plan must be refused.
    fn prevents_merge(&self) -> bool;

    /// Business-rule errors explaining why the plan is blocked.
    fn errors(&self) -> Vec<ReportError>;
}

/// Produces a plan from captured clinic state. Planners never write.
pub trait Planner {
    type Output;

    fn plan(&self) -> Result<Self::Output, MergeError>;
}

/// Run planners in order, stopping at the first failure.
pub fn run_planners<P, C>(planners: &[P]) -> Result<C, MergeError>
where
    P: Planner,
    C: FromIterator<P::Output>,
{
    planners.iter().map(Planner::plan).collect()
}

pub fn plans_prevent_merge<'a, P>(plans: impl IntoIterator<Item = &'a P>) -> bool
where
    P: Plan + 'a,
{
    plans.into_iter().any(Plan::prevents_merge)
}

pub fn plans_errors<'a, P>(plans: impl IntoIterator<Item = &'a P>) -> Vec<ReportError>
where
    P: Plan + 'a,
{
    plans.into_iter().flat_map(Plan::errors).collect()
}

/// Declares a serializable list of plans with slice access.
macro_rules! plan_list {
    ($(#[$meta:meta])* $list:ident, $item:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(transparent)]
        pub struct $list(pub Vec<$item>);

        impl ::core::ops::Deref for $list {
            type Target = [$item];

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<Vec<$item>> for $list {
            fn from(value: Vec<$item>) -> Self {
                Self(value)
            }
        }

        impl FromIterator<$item> for $list {
            fn from_iter<I: IntoIterator<Item = $item>>(iter: I) -> Self {
                Self(iter.into_iter().collect())
            }
        }

        impl<'a> IntoIterator for &'a $list {
            type Item = &'a $item;
            type IntoIter = ::core::slice::Iter<'a, $item>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }
    };
}

pub(crate) use plan_list;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Blocked(bool);

    impl Plan for Blocked {
        fn prevents_merge(&self) -> bool {
            self.0
        }

        fn errors(&self) -> Vec<ReportError> {
            if self.0 {
                vec![ReportError::WorkspaceSettingsMismatch]
            } else {
                vec![]
            }
        }
    }

    struct Echo(u32);

    impl Planner for Echo {
        type Output = u32;

        fn plan(&self) -> Result<u32, MergeError> {
            if self.0 == 0 {
                Err(MergeError::unexpected("echo", "zero"))
            } else {
                Ok(self.0)
            }
        }
    }

    #[test]
    fn any_blocked_element_blocks_the_list() {
        let plans = [Blocked(false), Blocked(true), Blocked(false)];
        assert!(plans_prevent_merge(&plans));
        assert_eq!(plans_errors(&plans), vec![ReportError::WorkspaceSettingsMismatch]);
        assert!(!plans_prevent_merge(&[Blocked(false)]));
    }

    #[test]
    fn run_planners_stops_on_error() {
        let ok: Vec<u32> = run_planners(&[Echo(1), Echo(2)]).unwrap();
        assert_eq!(ok, vec![1, 2]);
        assert!(run_planners::<_, Vec<u32>>(&[Echo(1), Echo(0)]).is_err());
    }
}

// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The result of a [crate::rpc::call] on a grid address

use crate::{GridErr, MessagingErr, Outcome};

/// The result from a [crate::rpc::call] operation
#[derive(Debug, Eq, PartialEq)]
pub enum CallResult<TResult> {
    /// The unit answered
    Success(TResult),
    /// No answer arrived in time
    Timeout,
    /// The reply channel was dropped without an answer, for instance because the
    /// unit stopped or the correlation was cancelled
    SenderError,
}

impl<T> CallResult<T> {
    /// Determine if the [CallResult] is a [CallResult::Success]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Determine if the [CallResult] is a [CallResult::Timeout]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Determine if the [CallResult] is a [CallResult::SenderError]
    pub fn is_send_error(&self) -> bool {
        matches!(self, Self::SenderError)
    }

    /// Unwrap a [CallResult], panicking on any non-success
    pub fn unwrap(self) -> T {
        match self {
            Self::Success(t) => t,
            Self::Timeout => panic!("called CallResult::<T>::unwrap() on a `Timeout` value"),
            Self::SenderError => {
                panic!("called CallResult::<T>::unwrap() on a `SenderError` value")
            }
        }
    }

    /// Unwrap the [CallResult] or give a default value
    pub fn unwrap_or(self, default: T) -> T {
        if let Self::Success(t) = self {
            t
        } else {
            default
        }
    }

    /// Transforms the [CallResult] to a Result mapping `Success(t)` to `Ok(t)` and all else to `Err(err)`
    pub fn success_or<E>(self, err: E) -> Result<T, E> {
        if let Self::Success(t) = self {
            Ok(t)
        } else {
            Err(err)
        }
    }

    /// Maps the success value of the [CallResult] to another type
    pub fn map<O, F>(self, mapping: F) -> CallResult<O>
    where
        F: FnOnce(T) -> O,
    {
        match self {
            Self::Success(t) => CallResult::Success(mapping(t)),
            Self::Timeout => CallResult::Timeout,
            Self::SenderError => CallResult::SenderError,
        }
    }
}

impl CallResult<Outcome> {
    /// Flatten into the reply payload, folding every failure into a [GridErr]
    pub fn into_reply(self) -> Result<Vec<u8>, GridErr> {
        match self {
            Self::Success(Ok(reply)) => Ok(reply),
            Self::Success(Err(reason)) => Err(GridErr::Remote(reason)),
            Self::Timeout => Err(GridErr::Timeout),
            Self::SenderError => Err(MessagingErr::<()>::ChannelClosed.into()),
        }
    }
}

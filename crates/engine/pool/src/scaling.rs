// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Adaptive scaling decisions. The pool applies them and enforces the cooldown.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub target_response_ms: f64,
    pub scale_up_queue_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingInputs {
    /// Live sessions plus sessions still starting
    pub pool_size: usize,
    /// `None` before any analysis completed
    pub avg_response_ms: Option<f64>,
    pub queue_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    Hold,
}

pub fn decide(policy: &ScalingPolicy, inputs: &ScalingInputs) -> ScalingDecision {
    let slow = inputs.avg_response_ms.is_some_and(|avg| avg > 1.5 * policy.target_response_ms);
    let backlog = inputs.queue_length > policy.scale_up_queue_length;
    if (slow || backlog) && inputs.pool_size < policy.max_pool_size {
        return ScalingDecision::ScaleUp;
    }

    let fast = inputs.avg_response_ms.is_some_and(|avg| avg < 0.5 * policy.target_response_ms);
    if fast && inputs.queue_length == 0 && inputs.pool_size > policy.min_pool_size {
        return ScalingDecision::ScaleDown;
    }

    ScalingDecision::Hold
}

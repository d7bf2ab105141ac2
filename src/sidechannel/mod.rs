//! Side-channel collaborator interface.
//!
//! The subprocess asks for permissions, clarifications and session operations
//! out-of-band. This module defines the typed request/response surface only;
//! the transport that the subprocess calls into is an external collaborator.
//!
//! Each request kind is a lane: a receive channel the application drains,
//! plus a submit method that becomes a no-op once the side-channel stops, so
//! late callers never block or panic.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Lane capacity; interactive prompts are rare and handled one at a time.
const LANE_CAPACITY: usize = 8;

/// Decision on a permission prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
}

/// A tool call awaiting user permission.
#[derive(Debug)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub respond: oneshot::Sender<PermissionDecision>,
}

/// A clarifying question from the subprocess.
#[derive(Debug)]
pub struct ClarifyingQuestion {
    pub question: String,
    /// Structured choices, when the subprocess offered any.
    pub options: Vec<String>,
    pub respond: oneshot::Sender<String>,
}

/// Decision on a proposed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PlanDecision {
    Approve,
    Reject { feedback: String },
}

/// A plan awaiting approval.
#[derive(Debug)]
pub struct PlanApproval {
    pub plan: String,
    pub respond: oneshot::Sender<PlanDecision>,
}

/// Supervisor-mode: spawn a child session.
#[derive(Debug)]
pub struct CreateChildRequest {
    pub prompt: String,
    pub respond: oneshot::Sender<Result<String, String>>,
}

/// Supervisor-mode: list child session ids.
#[derive(Debug)]
pub struct ListChildrenRequest {
    pub respond: oneshot::Sender<Vec<String>>,
}

/// Supervisor-mode: merge a child session's work.
#[derive(Debug)]
pub struct MergeChildRequest {
    pub child_session_id: String,
    pub respond: oneshot::Sender<Result<(), String>>,
}

/// Autonomous mode: open a pull request.
#[derive(Debug)]
pub struct CreatePrRequest {
    pub title: String,
    pub body: String,
    pub respond: oneshot::Sender<Result<String, String>>,
}

/// Autonomous mode: push the working branch.
#[derive(Debug)]
pub struct PushBranchRequest {
    pub branch: String,
    pub respond: oneshot::Sender<Result<(), String>>,
}

/// Autonomous mode: fetch review comments on the open PR.
#[derive(Debug)]
pub struct ReviewCommentsRequest {
    pub respond: oneshot::Sender<Vec<String>>,
}

/// One request kind's channel, with a submit side that goes inert on stop.
#[derive(Debug)]
pub struct Lane<T> {
    sender: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> Lane<T> {
    fn new() -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(LANE_CAPACITY);
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Submit a request. Returns false once the lane is stopped or full.
    pub fn submit(&self, request: T) -> bool {
        let sender = {
            let guard = self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.clone()
        };
        match sender {
            Some(sender) => sender.try_send(request).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }
}

impl<T> Clone for Lane<T> {
    fn clone(&self) -> Self {
        let guard = self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self {
            sender: Mutex::new(guard.clone()),
        }
    }
}

/// Submit side of the side-channel, handed to the transport collaborator.
#[derive(Debug)]
pub struct SideChannel {
    pub permission: Lane<PermissionRequest>,
    pub question: Lane<ClarifyingQuestion>,
    pub plan: Lane<PlanApproval>,
    pub create_child: Lane<CreateChildRequest>,
    pub list_children: Lane<ListChildrenRequest>,
    pub merge_child: Lane<MergeChildRequest>,
    pub create_pr: Lane<CreatePrRequest>,
    pub push_branch: Lane<PushBranchRequest>,
    pub review_comments: Lane<ReviewCommentsRequest>,
}

/// Receive side of the side-channel, drained by the application layer.
#[derive(Debug)]
pub struct SideChannelReceivers {
    pub permission: mpsc::Receiver<PermissionRequest>,
    pub question: mpsc::Receiver<ClarifyingQuestion>,
    pub plan: mpsc::Receiver<PlanApproval>,
    pub create_child: mpsc::Receiver<CreateChildRequest>,
    pub list_children: mpsc::Receiver<ListChildrenRequest>,
    pub merge_child: mpsc::Receiver<MergeChildRequest>,
    pub create_pr: mpsc::Receiver<CreatePrRequest>,
    pub push_branch: mpsc::Receiver<PushBranchRequest>,
    pub review_comments: mpsc::Receiver<ReviewCommentsRequest>,
}

impl SideChannel {
    /// Create the paired submit and receive sides.
    #[must_use]
    pub fn new() -> (Self, SideChannelReceivers) {
        let (permission, permission_rx) = Lane::new();
        let (question, question_rx) = Lane::new();
        let (plan, plan_rx) = Lane::new();
        let (create_child, create_child_rx) = Lane::new();
        let (list_children, list_children_rx) = Lane::new();
        let (merge_child, merge_child_rx) = Lane::new();
        let (create_pr, create_pr_rx) = Lane::new();
        let (push_branch, push_branch_rx) = Lane::new();
        let (review_comments, review_comments_rx) = Lane::new();
        (
            Self {
                permission,
                question,
                plan,
                create_child,
                list_children,
                merge_child,
                create_pr,
                push_branch,
                review_comments,
            },
            SideChannelReceivers {
                permission: permission_rx,
                question: question_rx,
                plan: plan_rx,
                create_child: create_child_rx,
                list_children: list_children_rx,
                merge_child: merge_child_rx,
                create_pr: create_pr_rx,
                push_branch: push_branch_rx,
                review_comments: review_comments_rx,
            },
        )
    }

    /// Stop every lane: waiting receivers unblock, later submits no-op.
    pub fn stop(&self) {
        self.permission.close();
        self.question.close();
        self.plan.close();
        self.create_child.close();
        self.list_children.close();
        self.merge_child.close();
        self.create_pr.close();
        self.push_branch.close();
        self.review_comments.close();
    }
}

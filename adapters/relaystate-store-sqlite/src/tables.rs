//! Table name constants shared between [`crate::json_store`]'s generic
//! `CREATE TABLE` and [`crate::repos`]'s natural-key queries, so the two
//! never drift apart.

pub const IDENTITY: &str = "identity";
pub const DOMAIN: &str = "domain";
pub const POST: &str = "post";
pub const FOLLOW: &str = "follow";
pub const BLOCK: &str = "block";
pub const POST_INTERACTION: &str = "post_interaction";
pub const EMOJI: &str = "emoji";
pub const HASHTAG: &str = "hashtag";
pub const TIMELINE_EVENT: &str = "timeline_event";
pub const FAN_OUT: &str = "fan_out";
pub const INBOX_MESSAGE: &str = "inbox_message";
pub const POST_ATTACHMENT: &str = "post_attachment";
pub const REPORT: &str = "report";

pub const ALL: &[&str] = &[
	IDENTITY,
	DOMAIN,
	POST,
	FOLLOW,
	BLOCK,
	POST_INTERACTION,
	EMOJI,
	HASHTAG,
	TIMELINE_EVENT,
	FAN_OUT,
	INBOX_MESSAGE,
	POST_ATTACHMENT,
	REPORT,
];

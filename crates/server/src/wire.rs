use courier_proto::{ContactBody, ConversationBody, MessageBody, UserBody};
use courier_storage::{ContactRecord, ConversationSummary, MessageRecord, UserRecord};

pub fn user_body(record: &UserRecord) -> UserBody {
    UserBody {
        id: record.id,
        username: record.username.clone(),
        display_name: record.display_name.clone(),
        is_online: record.is_online,
        last_seen: record.last_seen,
        avatar_url: record.avatar_url.clone(),
    }
}

pub fn message_body(record: &MessageRecord) -> MessageBody {
    MessageBody {
        id: record.id,
        sender_id: record.sender_id,
        receiver_id: record.receiver_id,
        content: record.content.clone(),
        created_at: record.created_at,
        is_read: record.is_read,
        read_at: record.read_at,
    }
}

pub fn contact_body(record: &ContactRecord) -> ContactBody {
    ContactBody {
        owner_id: record.owner_id,
        contact_id: record.contact_id,
        created_at: record.created_at,
    }
}

pub fn conversation_body(summary: &ConversationSummary) -> ConversationBody {
    ConversationBody {
        contact: user_body(&summary.contact),
        last_message: message_body(&summary.last_message),
    }
}
